use std::fs;
use std::path::Path;

use drillroom_schema::Role;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidentTimeline {
    pub detected_at_utc: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidentSignals {
    pub duplicate_orders: Option<u64>,
    pub estimated_loss_usd: Option<f64>,
    pub latest_example_order_id: Option<String>,
    pub latest_example_tx_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactScope {
    pub channel: Option<String>,
    pub affected_users: Option<String>,
    pub customer_risk: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailableControls {
    pub containment_options: Vec<String>,
    pub rollback_options: Vec<String>,
    pub validation_signals: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleNotes {
    pub qa: Vec<String>,
    pub ba: Vec<String>,
    pub tech_lead: Vec<String>,
}

/// Static ground truth about the simulated incident.
///
/// A brief read from JSON replaces the built-in brief key by key: a key
/// present in the file wins as a whole, an absent key keeps the built-in
/// value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidentBrief {
    pub incident_id: String,
    pub title: String,
    pub severity: String,
    pub summary: String,
    pub timeline: IncidentTimeline,
    pub signals: IncidentSignals,
    pub impact_scope: ImpactScope,
    pub known_root_cause_hypothesis: Option<String>,
    pub available_controls: AvailableControls,
    pub unknowns: Vec<String>,
    pub role_notes: RoleNotes,
}

impl Default for IncidentBrief {
    fn default() -> Self {
        Self {
            incident_id: "INC-PAY-2201".into(),
            title: "Duplicate charge during gateway retry path".into(),
            severity: "P0".into(),
            summary: "A subset of checkout orders are charged twice when timeout + retry happens without idempotency enforcement.".into(),
            timeline: IncidentTimeline::default(),
            signals: IncidentSignals {
                duplicate_orders: Some(17),
                estimated_loss_usd: Some(1840.0),
                ..Default::default()
            },
            impact_scope: ImpactScope::default(),
            known_root_cause_hypothesis: Some(
                "Idempotency key exists but is not enforced before chargeGateway call.".into(),
            ),
            available_controls: AvailableControls::default(),
            unknowns: vec!["Exact affected rate is not fully confirmed yet.".into()],
            role_notes: RoleNotes::default(),
        }
    }
}

const DEFAULT_VALIDATION_SIGNAL: &str = "no new duplicate-charge log in rolling window";
const DEFAULT_SECOND_VALIDATION_SIGNAL: &str = "no order with txCount > 1 in rolling window";
const DEFAULT_ROLLBACK_OPTION: &str = "revert payment flow patch";

fn or_unknown(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("unknown")
}

fn first_three(items: &[String], empty: &str) -> String {
    if items.is_empty() {
        return empty.to_string();
    }
    items.iter().take(3).cloned().collect::<Vec<_>>().join(" | ")
}

impl IncidentBrief {
    /// Reads a brief from `path`. Any failure keeps the built-in brief so a
    /// bad scenario file never blocks a session.
    pub fn load(path: &Path) -> Self {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "incident brief not readable, using built-in");
                return Self::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(brief) => brief,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "incident brief not valid json, using built-in");
                Self::default()
            }
        }
    }

    pub fn role_notes(&self, role: Role) -> &[String] {
        match role {
            Role::Qa => &self.role_notes.qa,
            Role::Ba => &self.role_notes.ba,
            Role::TechLead => &self.role_notes.tech_lead,
            Role::Participant | Role::System => &[],
        }
    }

    /// Thirteen `Label: value` lines given to the reply model as ground truth.
    pub fn fact_pack(&self, role: Role) -> String {
        let signals = &self.signals;
        let impact = &self.impact_scope;
        let controls = &self.available_controls;
        let duplicates = signals
            .duplicate_orders
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".into());
        let loss = signals
            .estimated_loss_usd
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".into());
        let notes = self.role_notes(role);

        [
            format!("Incident ID: {}", self.incident_id),
            format!("Title: {}", self.title),
            format!("Severity: {}", self.severity),
            format!("Summary: {}", self.summary),
            format!("Detected: {}", or_unknown(self.timeline.detected_at_utc.as_deref())),
            format!(
                "Signals: duplicate_orders={duplicates}, estimated_loss_usd={loss}, example_order={}",
                or_unknown(signals.latest_example_order_id.as_deref())
            ),
            format!(
                "Impact scope: channel={}; affected_users={}; customer_risk={}",
                or_unknown(impact.channel.as_deref()),
                or_unknown(impact.affected_users.as_deref()),
                or_unknown(impact.customer_risk.as_deref())
            ),
            format!(
                "Root cause hypothesis: {}",
                or_unknown(self.known_root_cause_hypothesis.as_deref())
            ),
            format!("Containment options: {}", first_three(&controls.containment_options, "unknown")),
            format!("Rollback options: {}", first_three(&controls.rollback_options, "unknown")),
            format!("Validation signals: {}", first_three(&controls.validation_signals, "unknown")),
            format!("Unknowns: {}", first_three(&self.unknowns, "none")),
            format!(
                "Role notes: {}",
                if notes.is_empty() { "none".to_string() } else { notes.join(" | ") }
            ),
        ]
        .join("\n")
    }

    pub fn duplicate_orders_text(&self) -> String {
        self.signals
            .duplicate_orders
            .map(|n| n.to_string())
            .unwrap_or_else(|| "some".into())
    }

    pub fn loss_text(&self) -> String {
        self.signals
            .estimated_loss_usd
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".into())
    }

    pub fn sample_order(&self) -> &str {
        self.signals
            .latest_example_order_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or("a recent order")
    }

    pub fn sample_tx_ids(&self) -> Vec<&str> {
        self.signals
            .latest_example_tx_ids
            .iter()
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn cause(&self) -> &str {
        self.known_root_cause_hypothesis
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or("idempotency not enforced before charging")
    }

    pub fn endpoint_hint(&self) -> String {
        match self.impact_scope.channel.as_deref().filter(|c| !c.is_empty()) {
            Some(channel) => format!("{channel} checkout payment flow"),
            None => "checkout payment flow".to_string(),
        }
    }

    pub fn primary_validation(&self) -> &str {
        self.available_controls
            .validation_signals
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_VALIDATION_SIGNAL)
    }

    pub fn secondary_validation(&self) -> &str {
        self.available_controls
            .validation_signals
            .get(1)
            .map(String::as_str)
            .unwrap_or(DEFAULT_SECOND_VALIDATION_SIGNAL)
    }

    pub fn primary_rollback(&self) -> &str {
        self.available_controls
            .rollback_options
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_ROLLBACK_OPTION)
    }
}
