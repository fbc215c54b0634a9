pub mod apply;
pub mod callback;
pub mod config;
pub mod error;
pub mod httpserver;
pub mod operation;
pub mod oplog;
pub mod registry;
pub mod store;

pub use callback::{CallbackRegistry, OperationAppended, Priority};
pub use error::{ClusterError, OpLogError, OperationFailure, OperationFailureKind, StoreError};
pub use operation::{Operation, OperationContent, PipelineSpec, RoutableSpec};
pub use oplog::OpLog;
