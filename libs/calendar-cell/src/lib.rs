pub mod models;
pub mod services;
pub mod test_support;

pub use models::{
    BusyInterval, CalendarError, CreatedEvent, EventAttendee, EventPatch, EventReminder,
    NewCalendarEvent,
};
pub use services::client::{CalendarApi, HttpCalendarClient};
