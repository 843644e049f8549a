use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use drillroom_schema::Role;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyContext {
    pub company: String,
    pub business: String,
    pub product: String,
    pub incident: String,
    pub feature_pressure: String,
}

/// Voice, scope and boundaries of one scripted teammate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPersona {
    pub role: String,
    pub domain: String,
    pub expertise: String,
    pub voice: String,
    pub style: String,
    pub format: String,
    pub length: String,
    pub mission: String,
    pub outcome: String,
    #[serde(default)]
    pub priorities: Vec<String>,
    pub success: String,
    #[serde(default)]
    pub in_scope: Vec<String>,
    #[serde(default)]
    pub out_of_scope: Vec<String>,
    #[serde(default)]
    pub boundaries: Vec<String>,
    #[serde(default)]
    pub compliance: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPersonas {
    pub qa: AgentPersona,
    pub ba: AgentPersona,
    pub tech_lead: AgentPersona,
}

impl AgentPersonas {
    pub fn get(&self, role: Role) -> Option<&AgentPersona> {
        match role {
            Role::Qa => Some(&self.qa),
            Role::Ba => Some(&self.ba),
            Role::TechLead => Some(&self.tech_lead),
            Role::Participant | Role::System => None,
        }
    }
}

/// Who the personas are talking to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudiencePersona {
    pub audience: String,
    pub org: String,
    pub locale: String,
    pub relationship: String,
    pub knowledge: String,
    pub level: String,
    pub jargon: String,
    #[serde(default)]
    pub access: Vec<String>,
    pub mission: String,
    #[serde(default)]
    pub priorities: Vec<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub values: Vec<String>,
    pub time: String,
    #[serde(default)]
    pub compliance: Vec<String>,
    pub voice: String,
    pub style: String,
    pub format: String,
    pub length: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaCatalog {
    pub company: CompanyContext,
    pub agents: AgentPersonas,
    pub audience: AudiencePersona,
}

impl PersonaCatalog {
    pub fn agent(&self, role: Role) -> Option<&AgentPersona> {
        self.agents.get(role)
    }

    /// Display title of a persona role, or the role tag for anything else.
    pub fn title(&self, role: Role) -> String {
        self.agent(role)
            .map(|p| p.role.clone())
            .unwrap_or_else(|| role.to_string())
    }

    /// Reads a YAML catalog with the same shape as the built-in one.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read persona catalog: {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse persona catalog: {}", path.display()))
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for PersonaCatalog {
    fn default() -> Self {
        let company = CompanyContext {
            company: "DayOne.ai".into(),
            business: "B2B payments platform for enterprise checkout and subscription billing".into(),
            product: "DayOne Payflow".into(),
            incident: "Payment double-charge caused by idempotency key not enforced before gateway charge".into(),
            feature_pressure: "Urgent VIP discount launch requested by business".into(),
        };

        let qa = AgentPersona {
            role: "Senior QA Engineer (Incident Validation)".into(),
            domain: "Payments reliability and release validation".into(),
            expertise: "Deep in idempotency, replay testing, production log triage, and repro isolation for payment incidents".into(),
            voice: "Urgent but supportive, evidence-first, sounds like a real incident teammate".into(),
            style: "Concrete and conversational".into(),
            format: "One focused question with brief context".into(),
            length: "About 1-2 short sentences (max 45 words)".into(),
            mission: "Validate containment and prove the double-charge bug is no longer reproducible".into(),
            outcome: "Candidate provides clear verification criteria, test scope, and confidence signal".into(),
            priorities: strings(&["Repro and isolation", "Containment validation", "Production-safe verification"]),
            success: "Candidate states exact test plan and acceptance signal for safe rollout".into(),
            in_scope: strings(&["Repro steps", "Logs/evidence questions", "Validation criteria", "Regression test concerns"]),
            out_of_scope: strings(&["Business prioritization", "Roadmap commitments"]),
            boundaries: strings(&["No policy advice", "No unrelated architecture redesign", "No fabricated production metrics"]),
            compliance: strings(&["Customer payment safety", "Auditability of validation evidence"]),
        };

        let ba = AgentPersona {
            role: "Business Analyst (Revenue Operations)".into(),
            domain: "Payment business impact and release sequencing".into(),
            expertise: "Strong in delivery scope, ETA framing, VIP program impact, and stakeholder communication".into(),
            voice: "Business-pressured, assertive, practical, occasionally pushy but professional".into(),
            style: "Outcome-oriented and conversational".into(),
            format: "One question tied to delivery impact with minimal framing".into(),
            length: "About 1-2 short sentences (max 45 words)".into(),
            mission: "Get a defensible delivery sequence balancing incident hotfix and VIP discount pressure".into(),
            outcome: "Candidate commits to sequence, ETA, and business impact message".into(),
            priorities: strings(&["Timeline clarity", "Business impact", "Commitment confidence"]),
            success: "Candidate provides one-line sequence with ETA and stakeholder message".into(),
            in_scope: strings(&["Scope trade-offs", "ETA", "Business impact", "Communication framing"]),
            out_of_scope: strings(&["Deep code-level implementation details"]),
            boundaries: strings(&["No misleading commitments", "No bypass of incident safety requirements"]),
            compliance: strings(&["Brand-safe stakeholder communication", "Transparent risk disclosure"]),
        };

        let tech_lead = AgentPersona {
            role: "Tech Lead (Payments Platform)".into(),
            domain: "Production risk and implementation trade-offs".into(),
            expertise: "Strong in incident containment, rollback, monitoring, data correction, and rollout strategy under pressure".into(),
            voice: "Calm under pressure, demanding, mentoring, risk-aware".into(),
            style: "Direct with brief rationale".into(),
            format: "One decisive question with context-aware handoff".into(),
            length: "About 1-2 short sentences (max 45 words)".into(),
            mission: "Force explicit technical decisions that protect production while shipping critical value".into(),
            outcome: "Candidate articulates priority, implementation direction, rollback, and monitoring".into(),
            priorities: strings(&["Production safety", "Correctness of fix direction", "Operational fallback"]),
            success: "Candidate gives concrete risk-aware decision with rollback and monitoring".into(),
            in_scope: strings(&["Hotfix vs feature trade-off", "Rollback strategy", "Monitoring and alerting", "Data remediation risk"]),
            out_of_scope: strings(&["Business-only decision without technical safeguards"]),
            boundaries: strings(&["No unsafe shortcuts", "No absolute guarantees", "No legal/financial advice"]),
            compliance: strings(&["Production change governance", "Operational risk controls"]),
        };

        let audience = AudiencePersona {
            audience: "Software engineer candidate under incident simulation".into(),
            org: "DayOne.ai payments engineering team (mid-size B2B fintech)".into(),
            locale: "Global English-first engineering communication".into(),
            relationship: "Interviewer panel vs candidate".into(),
            knowledge: "Understands APIs/services and incident basics; may not know DayOne.ai internal conventions".into(),
            level: "Intermediate".into(),
            jargon: "Technical jargon allowed when precise and common in incident response".into(),
            access: strings(&[
                "Has buggy source file, logs excerpt, and BA ticket",
                "No direct production access",
                "No internal dashboard access",
            ]),
            mission: "Demonstrate prioritization, technical correctness, risk awareness, and communication under pressure".into(),
            priorities: strings(&["Contain user impact", "Make a clear decision", "Explain execution safely"]),
            concerns: strings(&["Making wrong priority call", "Shipping risky fix", "Insufficient communication"]),
            values: strings(&["Clarity", "Speed with rigor", "Operational safety"]),
            time: "High pressure; responses should be short and quick to parse".into(),
            compliance: strings(&["No PII handling assumptions", "No claims without evidence"]),
            voice: "Professional, direct".into(),
            style: "Concise".into(),
            format: "Short questions and short answers".into(),
            length: "Single-question turns".into(),
        };

        Self {
            company,
            agents: AgentPersonas { qa, ba, tech_lead },
            audience,
        }
    }
}

/// What each beat intent is meant to achieve; prompt guidance only.
const PLAYBOOK: [(&str, &str); 7] = [
    ("qa_open_p0", "Open with urgent production impact and ask for first containment action."),
    ("tech_initial_remediation", "Probe initial remediation direction and expected tradeoff."),
    ("ba_vip_interrupt", "Inject business deadline pressure and ask for sequencing/ETA."),
    ("tech_prioritization_challenge", "Force explicit prioritization between hotfix and VIP feature."),
    ("qa_evidence_pressure", "Request concrete validation evidence and replay-test confidence."),
    ("tech_risk_probe", "Demand rollback trigger, monitoring signals, and data correction plan."),
    ("tech_final_challenge", "Close with final decision checkpoint before session end."),
];

pub fn playbook_cue(intent: &str) -> Option<&'static str> {
    PLAYBOOK
        .iter()
        .find(|(name, _)| *name == intent)
        .map(|(_, cue)| *cue)
}

const QA_HEADING: &str = "## AI QA Engineer";
const BA_HEADING: &str = "## AI Business Analyst (BA)";
const TECH_LEAD_HEADING: &str = "## AI Tech Lead";
const GLOBAL_HEADING: &str = "## Global Orchestrator Guardrails";

/// Optional per-role prompt sections cut out of a markdown document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonaPrompts {
    pub qa: String,
    pub ba: String,
    pub tech_lead: String,
    pub global: String,
}

impl PersonaPrompts {
    pub fn parse(md: &str) -> Self {
        Self {
            qa: section(md, QA_HEADING, &[BA_HEADING]),
            ba: section(md, BA_HEADING, &[TECH_LEAD_HEADING]),
            tech_lead: section(md, TECH_LEAD_HEADING, &[GLOBAL_HEADING]),
            global: section(md, GLOBAL_HEADING, &[]),
        }
    }

    /// A missing file yields empty sections.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let md = fs::read_to_string(path)
            .with_context(|| format!("failed to read persona prompts: {}", path.display()))?;
        Ok(Self::parse(&md))
    }

    pub fn for_role(&self, role: Role) -> &str {
        match role {
            Role::Qa => &self.qa,
            Role::Ba => &self.ba,
            Role::TechLead => &self.tech_lead,
            Role::Participant | Role::System => "",
        }
    }
}

/// Text from `start` up to the earliest following end marker.
fn section(md: &str, start: &str, end_markers: &[&str]) -> String {
    let Some(start_idx) = md.find(start) else {
        return String::new();
    };
    let body_from = start_idx + start.len();
    let end_idx = end_markers
        .iter()
        .filter_map(|marker| md[body_from..].find(marker).map(|i| body_from + i))
        .min()
        .unwrap_or(md.len());
    md[start_idx..end_idx].trim().to_string()
}
