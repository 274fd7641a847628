//! Default tools: a mocked calendar backend, standing in for a real scheduling API.
//!
//! The availability check is deliberately trivial (any slot at 10:00 is already taken) so
//! that the tool-loop behavior (§8 scenario 3) is reproducible without an external service.

use super::error::{ToolError, ToolResult};
use super::traits::Tool;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub struct CheckCalendarAvailability;

#[async_trait]
impl Tool for CheckCalendarAvailability {
    fn name(&self) -> String {
        "check_calendar_availability".to_string()
    }

    fn description(&self) -> String {
        "Check whether a given date and time slot is available for booking.".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "date": {"type": "string", "description": "Date in YYYY-MM-DD format"},
                "time": {"type": "string", "description": "Time in HH:MM 24-hour format"},
            },
            "required": ["date", "time"],
        })
    }

    async fn call(&self, arguments: Value) -> ToolResult<Value> {
        let time = arguments
            .get("time")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("missing field 'time'".to_string()))?;
        let date = arguments
            .get("date")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("missing field 'date'".to_string()))?;

        // The 10:00 slot is perpetually booked in this mock backend.
        let available = !time.contains("10:00");
        debug!(target: "tools::calendar", %date, %time, available, "checked availability");
        Ok(Value::String(available.to_string()))
    }
}

pub struct BookAppointment;

#[async_trait]
impl Tool for BookAppointment {
    fn name(&self) -> String {
        "book_appointment".to_string()
    }

    fn description(&self) -> String {
        "Book an appointment for a given date, time, and customer name.".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "date": {"type": "string", "description": "Date in YYYY-MM-DD format"},
                "time": {"type": "string", "description": "Time in HH:MM 24-hour format"},
                "name": {"type": "string", "description": "Name the appointment is booked under"},
                "phone": {"type": "string", "description": "Optional callback phone number"},
            },
            "required": ["date", "time", "name"],
        })
    }

    async fn call(&self, arguments: Value) -> ToolResult<Value> {
        let date = arguments
            .get("date")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("missing field 'date'".to_string()))?;
        let time = arguments
            .get("time")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("missing field 'time'".to_string()))?;
        let name = arguments
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("missing field 'name'".to_string()))?;

        debug!(target: "tools::calendar", %date, %time, %name, "booked appointment");
        Ok(Value::String(format!(
            "Booked {name} for {date} at {time}."
        )))
    }
}

pub fn check_calendar_availability_tool() -> Arc<dyn Tool> {
    Arc::new(CheckCalendarAvailability)
}

pub fn book_appointment_tool() -> Arc<dyn Tool> {
    Arc::new(BookAppointment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ten_am_is_never_available() {
        let tool = CheckCalendarAvailability;
        let result = tool
            .call(json!({"date": "2025-01-14", "time": "10:00"}))
            .await
            .unwrap();
        assert_eq!(result, Value::String("false".to_string()));
    }

    #[tokio::test]
    async fn eleven_am_is_available() {
        let tool = CheckCalendarAvailability;
        let result = tool
            .call(json!({"date": "2025-01-14", "time": "11:00"}))
            .await
            .unwrap();
        assert_eq!(result, Value::String("true".to_string()));
    }

    #[tokio::test]
    async fn booking_confirms_with_name_and_time() {
        let tool = BookAppointment;
        let result = tool
            .call(json!({"date": "2025-01-14", "time": "11:00", "name": "John"}))
            .await
            .unwrap();
        assert_eq!(result, Value::String("Booked John for 2025-01-14 at 11:00.".to_string()));
    }
}
