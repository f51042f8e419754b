use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Agent specialization types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Planning,
    Coding,
    Testing,
    Debugging,
    Review,
    Refactoring,
    Documentation,
}

impl AgentType {
    pub const ALL: [AgentType; 7] = [
        AgentType::Planning,
        AgentType::Coding,
        AgentType::Testing,
        AgentType::Debugging,
        AgentType::Review,
        AgentType::Refactoring,
        AgentType::Documentation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Planning => "planning",
            AgentType::Coding => "coding",
            AgentType::Testing => "testing",
            AgentType::Debugging => "debugging",
            AgentType::Review => "review",
            AgentType::Refactoring => "refactoring",
            AgentType::Documentation => "documentation",
        }
    }

    /// Agent type that picks up this type's output during a collaboration
    ///
    /// Code goes to review, review findings to refactoring, and debugging
    /// fixes to testing.
    pub fn hand_off(&self) -> Option<AgentType> {
        match self {
            AgentType::Coding => Some(AgentType::Review),
            AgentType::Review => Some(AgentType::Refactoring),
            AgentType::Debugging => Some(AgentType::Testing),
            _ => None,
        }
    }

    /// Capabilities an agent of this type declares unless configured otherwise
    pub fn default_capabilities(&self) -> Vec<Capability> {
        use Capability::*;
        match self {
            AgentType::Planning => vec![Planning, CodeAnalysis],
            AgentType::Coding => vec![CodeGeneration, CodeAnalysis, Refactoring],
            AgentType::Testing => vec![TestGeneration, TestExecution],
            AgentType::Debugging => vec![Debugging, CodeAnalysis],
            AgentType::Review => vec![CodeReview, SecurityAudit, PerformanceAnalysis],
            AgentType::Refactoring => vec![Refactoring, CodeAnalysis],
            AgentType::Documentation => vec![Documentation],
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown agent type: {s}"))
    }
}

/// A label an agent declares support for, matched against task types
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Capability {
    Planning,
    CodeGeneration,
    CodeAnalysis,
    TestGeneration,
    TestExecution,
    Debugging,
    Refactoring,
    Documentation,
    CodeReview,
    SecurityAudit,
    PerformanceAnalysis,
    Custom(String),
}

impl Capability {
    pub fn as_str(&self) -> &str {
        match self {
            Capability::Planning => "planning",
            Capability::CodeGeneration => "code_generation",
            Capability::CodeAnalysis => "code_analysis",
            Capability::TestGeneration => "test_generation",
            Capability::TestExecution => "test_execution",
            Capability::Debugging => "debugging",
            Capability::Refactoring => "refactoring",
            Capability::Documentation => "documentation",
            Capability::CodeReview => "code_review",
            Capability::SecurityAudit => "security_audit",
            Capability::PerformanceAnalysis => "performance_analysis",
            Capability::Custom(name) => name,
        }
    }
}

impl From<&str> for Capability {
    fn from(s: &str) -> Self {
        match s {
            "planning" => Capability::Planning,
            "code_generation" => Capability::CodeGeneration,
            "code_analysis" => Capability::CodeAnalysis,
            "test_generation" => Capability::TestGeneration,
            "test_execution" => Capability::TestExecution,
            "debugging" => Capability::Debugging,
            "refactoring" => Capability::Refactoring,
            "documentation" => Capability::Documentation,
            "code_review" => Capability::CodeReview,
            "security_audit" => Capability::SecurityAudit,
            "performance_analysis" => Capability::PerformanceAnalysis,
            other => Capability::Custom(other.to_string()),
        }
    }
}

impl From<String> for Capability {
    fn from(s: String) -> Self {
        Capability::from(s.as_str())
    }
}

impl From<Capability> for String {
    fn from(c: Capability) -> Self {
        c.as_str().to_string()
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Agent status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Busy,
    Error,
    Offline,
}

impl AgentStatus {
    /// Whether the coordinator may route new work to an agent in this status
    pub fn is_available(&self) -> bool {
        !matches!(self, AgentStatus::Busy | AgentStatus::Offline)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Error => write!(f, "error"),
            AgentStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Configuration used to build an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub agent_type: AgentType,
    pub name: String,
    pub capabilities: Vec<Capability>,
    /// Executions the agent accepts at once before reporting itself busy
    pub max_concurrent: usize,
    pub model: String,
    pub provider: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub parameters: Map<String, Value>,
}

impl AgentConfig {
    /// Config for an agent of `agent_type` with its default capabilities
    pub fn for_type(agent_type: AgentType) -> Self {
        Self {
            id: generate_agent_id(agent_type),
            agent_type,
            name: format!("{agent_type} agent"),
            capabilities: agent_type.default_capabilities(),
            max_concurrent: 1,
            model: "claude-3-5-sonnet-20241022".to_string(),
            provider: "anthropic".to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            parameters: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities = capabilities.into_iter().collect();
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }
}

/// Point-in-time health of an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub agent_id: String,
    pub healthy: bool,
    pub status: AgentStatus,
    pub uptime: Duration,
    pub task_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub active_executions: usize,
    pub timestamp: DateTime<Utc>,
}

/// Generates an agent id of the form `<type>-<8 hex chars>`
pub fn generate_agent_id(agent_type: AgentType) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", agent_type, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_type_display_and_parse() {
        for agent_type in AgentType::ALL {
            let parsed: AgentType = agent_type.to_string().parse().unwrap();
            assert_eq!(parsed, agent_type);
        }
        assert!("pirate".parse::<AgentType>().is_err());
    }

    #[test]
    fn test_capability_from_known_and_custom_labels() {
        assert_eq!(Capability::from("code_review"), Capability::CodeReview);
        assert_eq!(
            Capability::from("translation"),
            Capability::Custom("translation".to_string())
        );
        assert_eq!(Capability::Custom("x".to_string()).as_str(), "x");
    }

    #[test]
    fn test_capability_serializes_as_label() {
        let json = serde_json::to_string(&Capability::TestGeneration).unwrap();
        assert_eq!(json, "\"test_generation\"");
        let back: Capability = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Capability::TestGeneration);
    }

    #[test]
    fn test_config_for_type_uses_default_capabilities() {
        let config = AgentConfig::for_type(AgentType::Testing);

        assert!(config.id.starts_with("testing-"));
        assert_eq!(config.id.len(), "testing-".len() + 8);
        assert_eq!(
            config.capabilities,
            vec![Capability::TestGeneration, Capability::TestExecution]
        );
        assert_eq!(config.max_concurrent, 1);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = generate_agent_id(AgentType::Coding);
        let b = generate_agent_id(AgentType::Coding);
        assert_ne!(a, b);
    }

    #[test]
    fn test_busy_and_offline_are_unavailable() {
        assert!(AgentStatus::Idle.is_available());
        assert!(AgentStatus::Error.is_available());
        assert!(!AgentStatus::Busy.is_available());
        assert!(!AgentStatus::Offline.is_available());
    }
}
