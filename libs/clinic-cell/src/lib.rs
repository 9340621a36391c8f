pub mod models;
pub mod services;

pub use models::{
    AppointmentRules, BreakWindow, BusinessHours, ClinicError, ClinicProfile, DaySchedule,
    Service, ServiceCategory,
};
pub use services::directory::{
    normalize_profile, normalize_service, normalize_services, ClinicDirectory,
};
