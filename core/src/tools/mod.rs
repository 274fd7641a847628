pub mod calendar;
pub mod error;
pub mod registry;
pub mod traits;

// Re-export common types
pub use calendar::{book_appointment_tool, check_calendar_availability_tool};
pub use error::{ToolError, ToolResult};
pub use registry::ToolRegistry;
pub use traits::Tool;
