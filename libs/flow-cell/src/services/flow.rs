use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use availability_cell::{SlotFinder, TimeSlot};
use booking_cell::{BookingError, BookingService};
use clinic_cell::{ClinicDirectory, ClinicProfile, Service};

use crate::models::{
    ConfirmationReply, FlowState, FlowStep, IntentKind, OutcomeMetadata, ResponseKind,
    ResponsePayload, TurnOutcome, TurnRequest,
};
use crate::services::parse;
use crate::services::store::FlowStateStore;

const MAX_SELECTION_ATTEMPTS: u32 = 3;
const DEFAULT_HORIZON_DAYS: i64 = 14;

/// Serializes turns per conversation key so a slow calendar call in one
/// turn cannot be overtaken by a faster concurrent turn for the same
/// patient. Distinct patients proceed in parallel.
struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().await;
            // Locks nobody is holding or waiting on can go.
            map.retain(|_, l| Arc::strong_count(l) > 1);
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// The top-level orchestrator: takes one inbound message plus the stored
/// conversation state, advances the booking state machine and answers a
/// structured outcome for the messaging layer to relay.
pub struct BookingFlowService {
    directory: ClinicDirectory,
    slot_finder: SlotFinder,
    booking: BookingService,
    store: Arc<dyn FlowStateStore>,
    locks: KeyedLocks,
    horizon_days: i64,
}

impl BookingFlowService {
    pub fn new(
        directory: ClinicDirectory,
        slot_finder: SlotFinder,
        booking: BookingService,
        store: Arc<dyn FlowStateStore>,
    ) -> Self {
        Self {
            directory,
            slot_finder,
            booking,
            store,
            locks: KeyedLocks::new(),
            horizon_days: DEFAULT_HORIZON_DAYS,
        }
    }

    pub fn with_horizon_days(mut self, horizon_days: i64) -> Self {
        self.horizon_days = horizon_days;
        self
    }

    pub async fn run_turn(&self, request: TurnRequest) -> TurnOutcome {
        // Turns for one patient apply in receipt order.
        let _guard = self.locks.acquire(&request.patient.phone).await;

        debug!(
            "Turn for clinic {} patient {} intent {}",
            request.clinic_id, request.patient.phone, request.intent.kind
        );

        match request.intent.kind {
            IntentKind::Create => self.handle_create(&request).await,
            other => self.handle_unsupported(&request, other).await,
        }
    }

    // ==========================================================================
    // CREATE FLOW
    // ==========================================================================

    async fn handle_create(&self, request: &TurnRequest) -> TurnOutcome {
        let key = &request.patient.phone;
        let mut tools = vec!["clinic_directory".to_string()];

        let clinic = match self.directory.get(&request.clinic_id).await {
            Ok(clinic) => clinic,
            Err(e) => {
                warn!("Clinic lookup failed for {}: {}", request.clinic_id, e);
                let _ = self.store.delete(key).await;
                let mut outcome = self.outcome(
                    ResponseKind::Failure,
                    "No momento não conseguimos agendar por aqui. Tente novamente mais tarde."
                        .to_string(),
                    Vec::new(),
                    FlowStep::Error,
                    &tools,
                );
                outcome.metadata.requires_human_intervention = true;
                outcome.metadata.error_tag = Some("clinic_not_configured".to_string());
                return outcome;
            }
        };

        let mut state = match self.store.get(key).await {
            Ok(Some(state)) if !state.step.is_terminal() => state,
            Ok(_) => FlowState::new(),
            Err(e) => {
                warn!("Flow state read failed for {}: {}", key, e);
                FlowState::new()
            }
        };

        let outcome = match state.step {
            FlowStep::Initial => self.start_flow(&clinic, &mut state, &mut tools),
            FlowStep::ServiceSelection => {
                self.select_service(&clinic, &mut state, request, &mut tools).await
            }
            FlowStep::DateTimeSelection => {
                self.select_slot(&clinic, &mut state, request, &mut tools).await
            }
            FlowStep::Confirmation => self.confirm(&clinic, &mut state, request, &mut tools).await,
            _ => {
                // Terminal steps are filtered on load; a fresh state restarts.
                state = FlowState::new();
                self.start_flow(&clinic, &mut state, &mut tools)
            }
        };

        if outcome.metadata.flow_step.is_terminal() {
            // Never leave a poisoned state behind; the next message starts
            // fresh.
            if let Err(e) = self.store.delete(key).await {
                warn!("Flow state delete failed for {}: {}", key, e);
            }
        } else if let Err(e) = self.store.put(key, &state).await {
            warn!("Flow state write failed for {}: {}", key, e);
        }

        outcome
    }

    fn start_flow(
        &self,
        clinic: &ClinicProfile,
        state: &mut FlowState,
        tools: &mut Vec<String>,
    ) -> TurnOutcome {
        if clinic.services.is_empty() {
            warn!("Clinic {} has no services configured", clinic.clinic_id);
            let mut outcome = self.outcome(
                ResponseKind::Failure,
                format!(
                    "No momento não conseguimos agendar por aqui. \
                     Entre em contato com a clínica pelo telefone {}.",
                    clinic.contact_phone
                ),
                Vec::new(),
                FlowStep::Error,
                tools,
            );
            outcome.metadata.requires_human_intervention = true;
            outcome.metadata.error_tag = Some("empty_catalogue".to_string());
            return outcome;
        }

        state.advance(FlowStep::ServiceSelection);
        let options = service_options(clinic);
        self.outcome(
            ResponseKind::ServiceList,
            format!(
                "Olá! Esses são os serviços disponíveis:\n{}\n\n\
                 Qual você gostaria de agendar? Responda com o número ou o nome.",
                options.join("\n")
            ),
            options,
            FlowStep::ServiceSelection,
            tools,
        )
    }

    async fn select_service(
        &self,
        clinic: &ClinicProfile,
        state: &mut FlowState,
        request: &TurnRequest,
        tools: &mut Vec<String>,
    ) -> TurnOutcome {
        match parse::match_service(&request.message, &clinic.services) {
            Some(service) => {
                let service = service.clone();
                info!(
                    "Patient {} selected service {} at clinic {}",
                    request.patient.phone, service.id, clinic.clinic_id
                );
                state.data.service = Some(service.clone());
                self.offer_slots(clinic, state, &service, tools).await
            }
            None => {
                let attempts = state.register_failed_attempt(format!(
                    "unrecognized service selection: {}",
                    truncate(&request.message)
                ));
                if attempts >= MAX_SELECTION_ATTEMPTS {
                    return self.escalate(clinic, "service_selection", tools);
                }
                let options = service_options(clinic);
                self.outcome(
                    ResponseKind::ServiceList,
                    format!(
                        "Desculpe, não consegui identificar o serviço. \
                         Essas são as opções:\n{}\n\n\
                         Responda com o número ou o nome do serviço.",
                        options.join("\n")
                    ),
                    options,
                    FlowStep::ServiceSelection,
                    tools,
                )
            }
        }
    }

    async fn offer_slots(
        &self,
        clinic: &ClinicProfile,
        state: &mut FlowState,
        service: &Service,
        tools: &mut Vec<String>,
    ) -> TurnOutcome {
        tools.push("availability_engine".to_string());
        let slots = self
            .slot_finder
            .find_available_slots(clinic, service, self.horizon_days)
            .await;

        state.advance(FlowStep::DateTimeSelection);

        if slots.is_empty() {
            info!(
                "No availability for service {} at clinic {}",
                service.id, clinic.clinic_id
            );
            state.data.offered_slots.clear();
            let mut outcome = self.outcome(
                ResponseKind::Info,
                format!(
                    "No momento não encontrei horários disponíveis para {}. \
                     Tente novamente mais tarde ou fale com a clínica pelo telefone {}.",
                    service.name, clinic.contact_phone
                ),
                Vec::new(),
                FlowStep::DateTimeSelection,
                tools,
            );
            outcome.metadata.error_tag = Some("no_availability".to_string());
            return outcome;
        }

        state.data.offered_slots = slots.clone();
        let options = slot_options(&slots);
        self.outcome(
            ResponseKind::SlotList,
            format!(
                "Esses são os próximos horários para {}:\n{}\n\n\
                 Responda com o número do horário desejado.",
                service.name,
                options.join("\n")
            ),
            options,
            FlowStep::DateTimeSelection,
            tools,
        )
    }

    async fn select_slot(
        &self,
        clinic: &ClinicProfile,
        state: &mut FlowState,
        request: &TurnRequest,
        tools: &mut Vec<String>,
    ) -> TurnOutcome {
        if state.data.offered_slots.is_empty() {
            // Nothing was offered last time (no availability); retry
            // discovery before interpreting the message.
            match state.data.service.clone() {
                Some(service) => return self.offer_slots(clinic, state, &service, tools).await,
                None => {
                    *state = FlowState::new();
                    return self.start_flow(clinic, state, tools);
                }
            }
        }

        match parse::parse_ordinal(&request.message, state.data.offered_slots.len()) {
            Some(n) => {
                let slot = state.data.offered_slots[n - 1].clone();
                state.data.selected_slot = Some(slot.clone());
                state.advance(FlowStep::Confirmation);

                let service = state.data.service.clone();
                self.outcome(
                    ResponseKind::ConfirmationSummary,
                    confirmation_message(service.as_ref(), &slot),
                    Vec::new(),
                    FlowStep::Confirmation,
                    tools,
                )
            }
            None => {
                let attempts = state.register_failed_attempt(format!(
                    "unrecognized slot selection: {}",
                    truncate(&request.message)
                ));
                if attempts >= MAX_SELECTION_ATTEMPTS {
                    return self.escalate(clinic, "date_time_selection", tools);
                }
                let options = slot_options(&state.data.offered_slots);
                self.outcome(
                    ResponseKind::SlotList,
                    format!(
                        "Desculpe, não entendi. Responda com o número de um dos horários:\n{}",
                        options.join("\n")
                    ),
                    options,
                    FlowStep::DateTimeSelection,
                    tools,
                )
            }
        }
    }

    async fn confirm(
        &self,
        clinic: &ClinicProfile,
        state: &mut FlowState,
        request: &TurnRequest,
        tools: &mut Vec<String>,
    ) -> TurnOutcome {
        let (service, slot) = match (state.data.service.clone(), state.data.selected_slot.clone())
        {
            (Some(service), Some(slot)) => (service, slot),
            _ => {
                // Confirmation without the accumulated data is a corrupted
                // state; restart rather than guess.
                *state = FlowState::new();
                return self.start_flow(clinic, state, tools);
            }
        };

        match parse::parse_confirmation(&request.message) {
            ConfirmationReply::Affirmative => {
                tools.push("booking_service".to_string());
                match self
                    .booking
                    .commit(clinic, &service, &slot, &request.patient)
                    .await
                {
                    Ok(record) => {
                        info!(
                            "Booking completed for patient {} at clinic {} (event {})",
                            request.patient.phone, clinic.clinic_id, record.event_id
                        );
                        let mut outcome = self.outcome(
                            ResponseKind::Success,
                            format!(
                                "Agendamento confirmado! {} em {} às {}.\n\
                                 Você receberá um lembrete um dia antes e outro uma hora antes.",
                                service.name, slot.date_label, slot.time_label
                            ),
                            Vec::new(),
                            FlowStep::Completed,
                            tools,
                        );
                        outcome.booking = Some(record);
                        outcome
                    }
                    Err(BookingError::SlotTaken) => {
                        warn!(
                            "Commit conflict for patient {} at clinic {}",
                            request.patient.phone, clinic.clinic_id
                        );
                        let mut outcome = self.outcome(
                            ResponseKind::Failure,
                            "Esse horário acabou de ser preenchido por outra pessoa. \
                             Me envie uma nova mensagem para buscarmos outros horários."
                                .to_string(),
                            Vec::new(),
                            FlowStep::Error,
                            tools,
                        );
                        outcome.metadata.error_tag = Some("booking_conflict".to_string());
                        outcome
                    }
                    Err(e) => {
                        // The flow still terminates: never leave the patient
                        // stuck re-answering questions already confirmed.
                        warn!(
                            "Commit failed for patient {} at clinic {}: {}",
                            request.patient.phone, clinic.clinic_id, e
                        );
                        state.error_history.push(format!("commit failed: {}", e));
                        let mut outcome = self.outcome(
                            ResponseKind::Failure,
                            format!(
                                "Não consegui concluir seu agendamento agora. \
                                 Por favor, entre em contato com a clínica pelo telefone {} \
                                 para finalizar.",
                                clinic.contact_phone
                            ),
                            Vec::new(),
                            FlowStep::Error,
                            tools,
                        );
                        outcome.metadata.requires_human_intervention = true;
                        outcome.metadata.error_tag = Some("commit_failed".to_string());
                        outcome
                    }
                }
            }
            ConfirmationReply::Negative => {
                info!(
                    "Patient {} cancelled the booking flow at clinic {}",
                    request.patient.phone, clinic.clinic_id
                );
                self.outcome(
                    ResponseKind::Info,
                    "Tudo bem, agendamento cancelado. Se precisar, é só chamar de novo!"
                        .to_string(),
                    Vec::new(),
                    FlowStep::Cancelled,
                    tools,
                )
            }
            ConfirmationReply::Unclear => {
                // Unclear replies count toward the same escalation bound as
                // the selection steps; re-prompting forever helps nobody.
                let attempts = state.register_failed_attempt(format!(
                    "unclear confirmation: {}",
                    truncate(&request.message)
                ));
                if attempts >= MAX_SELECTION_ATTEMPTS {
                    return self.escalate(clinic, "confirmation", tools);
                }
                self.outcome(
                    ResponseKind::ConfirmationSummary,
                    format!(
                        "Desculpe, não entendi. {}\n\
                         Responda \"sim\" para confirmar ou \"não\" para cancelar.",
                        confirmation_message(Some(&service), &slot)
                    ),
                    Vec::new(),
                    FlowStep::Confirmation,
                    tools,
                )
            }
        }
    }

    // ==========================================================================
    // OTHER INTENTS
    // ==========================================================================

    async fn handle_unsupported(&self, request: &TurnRequest, kind: IntentKind) -> TurnOutcome {
        let contact = match self.directory.get(&request.clinic_id).await {
            Ok(clinic) => format!(" pelo telefone {}", clinic.contact_phone),
            Err(_) => String::new(),
        };

        info!(
            "Unsupported intent {} for patient {} at clinic {}",
            kind, request.patient.phone, request.clinic_id
        );

        TurnOutcome {
            response: ResponsePayload {
                kind: ResponseKind::Info,
                message: format!(
                    "Por enquanto consigo ajudar apenas com novos agendamentos. \
                     Para remarcar, cancelar ou consultar seus horários, \
                     fale com a clínica{}.",
                    contact
                ),
                options: Vec::new(),
            },
            intent: kind.to_string(),
            tools_used: vec!["clinic_directory".to_string()],
            metadata: OutcomeMetadata {
                flow_step: FlowStep::Unsupported,
                requires_human_intervention: true,
                error_tag: Some("intent_not_implemented".to_string()),
            },
            booking: None,
        }
    }

    // ==========================================================================
    // OUTCOME HELPERS
    // ==========================================================================

    fn escalate(
        &self,
        clinic: &ClinicProfile,
        step_name: &str,
        tools: &[String],
    ) -> TurnOutcome {
        warn!(
            "Escalating conversation at clinic {} after repeated unrecognized input in {}",
            clinic.clinic_id, step_name
        );
        let mut outcome = self.outcome(
            ResponseKind::Escalation,
            "Vou passar seu atendimento para nossa equipe, que vai te ajudar a \
             concluir o agendamento. Aguarde um momento, por favor."
                .to_string(),
            Vec::new(),
            FlowStep::Escalated,
            tools,
        );
        outcome.metadata.requires_human_intervention = true;
        outcome.metadata.error_tag = Some(format!("{}_attempts_exhausted", step_name));
        outcome
    }

    fn outcome(
        &self,
        kind: ResponseKind,
        message: String,
        options: Vec<String>,
        flow_step: FlowStep,
        tools: &[String],
    ) -> TurnOutcome {
        TurnOutcome {
            response: ResponsePayload {
                kind,
                message,
                options,
            },
            intent: IntentKind::Create.to_string(),
            tools_used: tools.to_vec(),
            metadata: OutcomeMetadata {
                flow_step,
                requires_human_intervention: false,
                error_tag: None,
            },
            booking: None,
        }
    }
}

// ==============================================================================
// RENDERING
// ==============================================================================

fn service_options(clinic: &ClinicProfile) -> Vec<String> {
    clinic
        .services
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let mut line = format!("{}. {} ({} min)", i + 1, s.name, s.duration_minutes);
            if let Some(price) = s.price {
                line.push_str(&format!(" - {}", format_price(price)));
            }
            line
        })
        .collect()
}

fn slot_options(slots: &[TimeSlot]) -> Vec<String> {
    slots
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {} às {}", i + 1, s.date_label, s.time_label))
        .collect()
}

fn confirmation_message(service: Option<&Service>, slot: &TimeSlot) -> String {
    let service_line = service
        .map(|s| {
            let mut line = s.name.clone();
            if let Some(price) = s.price {
                line.push_str(&format!(" ({})", format_price(price)));
            }
            line
        })
        .unwrap_or_else(|| "seu atendimento".to_string());

    format!(
        "Vamos confirmar: {} em {} às {}. Posso confirmar? (sim/não)",
        service_line, slot.date_label, slot.time_label
    )
}

fn format_price(price: f64) -> String {
    format!("R$ {:.2}", price).replace('.', ",")
}

fn truncate(message: &str) -> String {
    message.chars().take(80).collect()
}
