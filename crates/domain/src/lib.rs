//! 账户生命周期核心领域模型
//!
//! 包含用户、封禁、订阅及审计记录等实体，错误分类，请求上下文，
//! 以及记录存储与审计存储的接口定义。本 crate 不做任何 I/O。

pub mod context;
pub mod entities;
pub mod errors;
pub mod repositories;
pub mod value_objects;

// 重新导出常用类型
pub use context::{Interrupted, RequestContext};
pub use entities::*;
pub use errors::*;
pub use repositories::*;
pub use value_objects::{Timestamp, UserId};
