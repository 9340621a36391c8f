use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::models::{ClinicError, ClinicProfile, Service, ServiceCategory};

/// Process-scoped clinic registry, injected wherever clinic configuration is
/// read. Callers own when entries are loaded and invalidated; nothing here
/// is ambient or global.
#[derive(Clone, Default)]
pub struct ClinicDirectory {
    clinics: Arc<RwLock<HashMap<String, Arc<ClinicProfile>>>>,
}

impl ClinicDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, profile: ClinicProfile) {
        let mut clinics = self.clinics.write().await;
        debug!("Caching clinic profile {}", profile.clinic_id);
        clinics.insert(profile.clinic_id.clone(), Arc::new(profile));
    }

    pub async fn get(&self, clinic_id: &str) -> Result<Arc<ClinicProfile>, ClinicError> {
        let clinics = self.clinics.read().await;
        clinics
            .get(clinic_id)
            .cloned()
            .ok_or_else(|| ClinicError::NotFound(clinic_id.to_string()))
    }

    pub async fn invalidate(&self, clinic_id: &str) {
        let mut clinics = self.clinics.write().await;
        if clinics.remove(clinic_id).is_some() {
            debug!("Invalidated clinic profile {}", clinic_id);
        }
    }
}

// ==============================================================================
// SERVICE NORMALIZATION
// ==============================================================================

fn first_str<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| raw.get(*k).and_then(Value::as_str))
}

fn first_number(raw: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| raw.get(*k).and_then(Value::as_f64))
}

fn parse_category(raw: Option<&str>) -> ServiceCategory {
    match raw.map(|s| s.to_lowercase()) {
        Some(s) if s.contains("exam") || s.contains("exame") => ServiceCategory::Exam,
        Some(s) if s.contains("procedure") || s.contains("procedimento") => {
            ServiceCategory::Procedure
        }
        Some(s) if s.contains("consult") => ServiceCategory::Consultation,
        Some(other) => {
            warn!("Unknown service category '{}', defaulting to consultation", other);
            ServiceCategory::Consultation
        }
        None => ServiceCategory::Consultation,
    }
}

/// The single place that understands the historical configuration shapes.
///
/// Clinic configurations arrive with several field spellings accumulated
/// over time; everything downstream works only with the canonical
/// [`Service`] produced here.
pub fn normalize_service(raw: &Value) -> Result<Service, ClinicError> {
    let id = first_str(raw, &["id", "service_id", "code"])
        .ok_or_else(|| ClinicError::InvalidConfig("service is missing an id".to_string()))?
        .to_string();

    let name = first_str(raw, &["name", "title", "label"])
        .ok_or_else(|| {
            ClinicError::InvalidConfig(format!("service {} is missing a name", id))
        })?
        .trim()
        .to_string();
    if name.is_empty() {
        return Err(ClinicError::InvalidConfig(format!("service {} has an empty name", id)));
    }

    let duration_minutes = first_number(
        raw,
        &["duration_minutes", "duration", "durationMinutes", "length_minutes"],
    )
    .ok_or_else(|| {
        ClinicError::InvalidConfig(format!("service {} is missing a duration", id))
    })? as i64;
    if duration_minutes <= 0 {
        return Err(ClinicError::InvalidConfig(format!(
            "service {} has a non-positive duration",
            id
        )));
    }

    let price = first_number(raw, &["price", "value", "amount"]);
    if let Some(p) = price {
        if p < 0.0 {
            return Err(ClinicError::InvalidConfig(format!(
                "service {} has a negative price",
                id
            )));
        }
    }

    let category = parse_category(first_str(raw, &["category", "type", "kind"]));
    let description = first_str(raw, &["description", "details"]).map(str::to_string);

    Ok(Service {
        id,
        name,
        category,
        duration_minutes,
        price,
        description,
    })
}

/// Normalizes a configured catalogue, preserving configuration order.
pub fn normalize_services(raw_list: &[Value]) -> Result<Vec<Service>, ClinicError> {
    raw_list.iter().map(normalize_service).collect()
}

/// Normalizes one clinic's full configuration document.
pub fn normalize_profile(raw: &Value) -> Result<ClinicProfile, ClinicError> {
    let clinic_id = first_str(raw, &["clinic_id", "id"])
        .ok_or_else(|| ClinicError::InvalidConfig("clinic is missing an id".to_string()))?
        .to_string();

    let name = first_str(raw, &["name"])
        .ok_or_else(|| {
            ClinicError::InvalidConfig(format!("clinic {} is missing a name", clinic_id))
        })?
        .to_string();

    let contact_phone = first_str(raw, &["contact_phone", "phone"])
        .ok_or_else(|| {
            ClinicError::InvalidConfig(format!("clinic {} is missing a contact phone", clinic_id))
        })?
        .to_string();

    let calendar_id = first_str(raw, &["calendar_id", "calendar"])
        .ok_or_else(|| {
            ClinicError::InvalidConfig(format!("clinic {} is missing a calendar id", clinic_id))
        })?
        .to_string();

    let timezone = first_str(raw, &["timezone"])
        .unwrap_or("America/Sao_Paulo")
        .to_string();
    let utc_offset_minutes =
        first_number(raw, &["utc_offset_minutes"]).map(|v| v as i32).unwrap_or(-180);

    let services = raw
        .get("services")
        .and_then(Value::as_array)
        .map(|list| normalize_services(list))
        .transpose()?
        .unwrap_or_default();

    let business_hours = raw
        .get("business_hours")
        .map(|v| {
            serde_json::from_value(v.clone()).map_err(|e| {
                ClinicError::InvalidConfig(format!(
                    "clinic {} has invalid business hours: {}",
                    clinic_id, e
                ))
            })
        })
        .transpose()?
        .unwrap_or_default();

    let rules = raw
        .get("rules")
        .map(|v| {
            serde_json::from_value(v.clone()).map_err(|e| {
                ClinicError::InvalidConfig(format!(
                    "clinic {} has invalid appointment rules: {}",
                    clinic_id, e
                ))
            })
        })
        .transpose()?
        .unwrap_or_default();

    Ok(ClinicProfile {
        clinic_id,
        name,
        timezone,
        utc_offset_minutes,
        contact_phone,
        calendar_id,
        services,
        business_hours,
        rules,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::models::{AppointmentRules, BusinessHours};

    fn profile(clinic_id: &str) -> ClinicProfile {
        ClinicProfile {
            clinic_id: clinic_id.to_string(),
            name: "Clínica Boa Vista".to_string(),
            timezone: "America/Sao_Paulo".to_string(),
            utc_offset_minutes: -180,
            contact_phone: "+55 11 4000-1000".to_string(),
            calendar_id: "cal-1".to_string(),
            services: vec![],
            business_hours: BusinessHours::default(),
            rules: AppointmentRules::default(),
        }
    }

    #[tokio::test]
    async fn directory_serves_and_invalidates_profiles() {
        let directory = ClinicDirectory::new();
        directory.upsert(profile("clinic-1")).await;

        assert!(directory.get("clinic-1").await.is_ok());
        assert_matches!(directory.get("clinic-2").await, Err(ClinicError::NotFound(_)));

        directory.invalidate("clinic-1").await;
        assert_matches!(directory.get("clinic-1").await, Err(ClinicError::NotFound(_)));
    }

    #[test]
    fn normalizes_the_canonical_shape() {
        let raw = json!({
            "id": "c1",
            "name": "Consulta Geral",
            "category": "consultation",
            "duration_minutes": 30,
            "price": 150.0,
            "description": "Avaliação clínica"
        });

        let service = normalize_service(&raw).unwrap();
        assert_eq!(service.id, "c1");
        assert_eq!(service.name, "Consulta Geral");
        assert_eq!(service.category, ServiceCategory::Consultation);
        assert_eq!(service.duration_minutes, 30);
        assert_eq!(service.price, Some(150.0));
    }

    #[test]
    fn normalizes_legacy_field_spellings() {
        let raw = json!({
            "service_id": "e2",
            "title": "Exame de Sangue",
            "type": "exame",
            "duration": 15,
            "value": 80.0
        });

        let service = normalize_service(&raw).unwrap();
        assert_eq!(service.id, "e2");
        assert_eq!(service.name, "Exame de Sangue");
        assert_eq!(service.category, ServiceCategory::Exam);
        assert_eq!(service.duration_minutes, 15);
        assert_eq!(service.price, Some(80.0));
    }

    #[test]
    fn rejects_invalid_duration_and_price() {
        let no_duration = json!({"id": "x", "name": "Consulta"});
        assert_matches!(normalize_service(&no_duration), Err(ClinicError::InvalidConfig(_)));

        let zero_duration = json!({"id": "x", "name": "Consulta", "duration": 0});
        assert_matches!(normalize_service(&zero_duration), Err(ClinicError::InvalidConfig(_)));

        let negative_price =
            json!({"id": "x", "name": "Consulta", "duration": 30, "price": -10.0});
        assert_matches!(normalize_service(&negative_price), Err(ClinicError::InvalidConfig(_)));
    }

    #[test]
    fn normalizes_a_full_clinic_document() {
        let raw = json!({
            "id": "clinic-1",
            "name": "Clínica Boa Vista",
            "phone": "+55 11 4000-1000",
            "calendar": "cal-1",
            "services": [
                {"id": "c1", "name": "Consulta Geral", "duration": 30}
            ],
            "business_hours": {
                "monday": {"open": "09:00:00", "close": "18:00:00", "break_window": null}
            },
            "rules": {"max_slots": 4}
        });

        let profile = normalize_profile(&raw).unwrap();
        assert_eq!(profile.clinic_id, "clinic-1");
        assert_eq!(profile.contact_phone, "+55 11 4000-1000");
        assert_eq!(profile.calendar_id, "cal-1");
        assert_eq!(profile.services.len(), 1);
        assert!(profile.business_hours.monday.is_some());
        assert!(profile.business_hours.tuesday.is_none());
        // Partial rules fall back to defaults field by field.
        assert_eq!(profile.rules.max_slots, 4);
        assert_eq!(profile.rules.min_advance_hours, AppointmentRules::default().min_advance_hours);
    }

    #[test]
    fn rejects_a_clinic_without_calendar() {
        let raw = json!({
            "id": "clinic-1",
            "name": "Clínica Boa Vista",
            "phone": "+55 11 4000-1000"
        });

        assert_matches!(normalize_profile(&raw), Err(ClinicError::InvalidConfig(_)));
    }

    #[test]
    fn catalogue_order_is_preserved() {
        let raw = vec![
            json!({"id": "b", "name": "Retorno", "duration": 20}),
            json!({"id": "a", "name": "Consulta Geral", "duration": 30}),
        ];

        let services = normalize_services(&raw).unwrap();
        assert_eq!(services[0].id, "b");
        assert_eq!(services[1].id, "a");
    }
}
