//! 编译模块：规则源摄入与编译会话生命周期
pub mod session;

pub use self::session::{CompilerSession, SessionStatus};
