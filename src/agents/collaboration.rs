use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::{Payload, TaskResult};

/// Recipient of a message addressed to every participant
pub const BROADCAST: &str = "all";

/// Kinds of inter-agent messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Request,
    Response,
    Proposal,
    Agreement,
    Disagreement,
    Question,
    Answer,
    Broadcast,
}

/// One entry of a collaboration's communication log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationMessage {
    pub id: Uuid,
    pub from: String,
    /// Agent id, or [`BROADCAST`]
    pub to: String,
    pub message_type: MessageType,
    pub content: String,
    pub metadata: Payload,
    pub timestamp: DateTime<Utc>,
}

impl CollaborationMessage {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: from.into(),
            to: to.into(),
            message_type,
            content: content.into(),
            metadata: Payload::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.to == BROADCAST || self.message_type == MessageType::Broadcast
    }
}

/// An agent's proposed solution to a contested issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub agent_id: String,
    pub solution: String,
    pub reasoning: String,
    pub confidence: f64,
    pub supporting: Payload,
}

impl Proposal {
    /// Proposal backed by an agent's result; the solution is the serialized output
    pub fn from_result(result: &TaskResult) -> Self {
        Self {
            agent_id: result.agent_id.clone(),
            solution: serde_json::to_string(&result.output).unwrap_or_default(),
            reasoning: String::new(),
            confidence: result.confidence,
            supporting: Payload::new(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }
}

/// Strategy for settling a conflict
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    /// The solution proposed by most agents wins; ties go to the higher
    /// combined confidence, then to the earlier proposal
    #[default]
    Voting,
    /// The collaboration lead's proposal wins
    Coordinator,
    /// Resolves only when every proposal agrees
    Consensus,
    /// The single most confident proposal wins
    HighConfidence,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Voting => "voting",
            Self::Coordinator => "coordinator",
            Self::Consensus => "consensus",
            Self::HighConfidence => "high_confidence",
        }
    }
}

impl std::fmt::Display for ResolutionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "voting" => Ok(Self::Voting),
            "coordinator" => Ok(Self::Coordinator),
            "consensus" => Ok(Self::Consensus),
            "high_confidence" => Ok(Self::HighConfidence),
            other => Err(format!("unknown resolution method '{other}'")),
        }
    }
}

/// How a conflict was settled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub method: ResolutionMethod,
    /// Agent whose proposal was chosen
    pub winner: String,
    pub explanation: String,
    pub final_proposal: Proposal,
}

/// Disagreement between agents on one issue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub id: Uuid,
    pub agents: Vec<String>,
    pub issue: String,
    pub proposals: Vec<Proposal>,
    pub resolution: Option<Resolution>,
    /// Winning agent id, `"vote"`, `"consensus"` or `"coordinator"`
    pub resolved_by: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Conflict {
    pub fn new(issue: impl Into<String>, proposals: Vec<Proposal>) -> Self {
        let mut agents: Vec<String> = Vec::new();
        for proposal in &proposals {
            if !agents.contains(&proposal.agent_id) {
                agents.push(proposal.agent_id.clone());
            }
        }
        Self {
            id: Uuid::new_v4(),
            agents,
            issue: issue.into(),
            proposals,
            resolution: None,
            resolved_by: None,
            timestamp: Utc::now(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Settles the conflict with `method`
    ///
    /// Returns false if the conflict has no proposals, is already resolved,
    /// or the method cannot reach a decision.
    pub fn resolve(&mut self, method: ResolutionMethod) -> bool {
        if self.is_resolved() || self.proposals.is_empty() {
            return false;
        }

        let decision = match method {
            ResolutionMethod::Voting => self.by_vote(),
            ResolutionMethod::Coordinator => self.proposals.first().map(|p| {
                (p.clone(), "coordinator".to_string(), "lead proposal chosen".to_string())
            }),
            ResolutionMethod::Consensus => self.by_consensus(),
            ResolutionMethod::HighConfidence => self.by_confidence(),
        };

        let Some((chosen, resolved_by, explanation)) = decision else {
            return false;
        };
        self.resolved_by = Some(resolved_by);
        self.resolution = Some(Resolution {
            method,
            winner: chosen.agent_id.clone(),
            explanation,
            final_proposal: chosen,
        });
        true
    }

    fn by_vote(&self) -> Option<(Proposal, String, String)> {
        // solution -> (votes, combined confidence, first proposal index)
        let mut tally: HashMap<&str, (usize, f64, usize)> = HashMap::new();
        for (index, proposal) in self.proposals.iter().enumerate() {
            let entry = tally
                .entry(proposal.solution.as_str())
                .or_insert((0, 0.0, index));
            entry.0 += 1;
            entry.1 += proposal.confidence;
        }

        let (_, (votes, _, index)) = tally.into_iter().max_by(|(_, a), (_, b)| {
            a.0.cmp(&b.0)
                .then(a.1.total_cmp(&b.1))
                .then(b.2.cmp(&a.2))
        })?;
        let chosen = self.proposals.get(index)?.clone();
        Some((
            chosen,
            "vote".to_string(),
            format!("{votes} of {} proposals agreed", self.proposals.len()),
        ))
    }

    fn by_consensus(&self) -> Option<(Proposal, String, String)> {
        let first = self.proposals.first()?;
        if self.proposals.iter().any(|p| p.solution != first.solution) {
            return None;
        }
        Some((
            first.clone(),
            "consensus".to_string(),
            "all proposals agreed".to_string(),
        ))
    }

    fn by_confidence(&self) -> Option<(Proposal, String, String)> {
        let chosen = self
            .proposals
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| a.confidence.total_cmp(&b.confidence).then(ib.cmp(ia)))
            .map(|(_, p)| p.clone())?;
        let explanation = format!("highest confidence {:.2}", chosen.confidence);
        Some((chosen.clone(), chosen.agent_id, explanation))
    }
}

/// Outcome of a task worked on by several agents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationResult {
    pub success: bool,
    /// Each participant's result, keyed by agent id
    pub results: HashMap<String, TaskResult>,
    /// The agreed-upon result
    pub consensus: Option<TaskResult>,
    pub conflicts: Vec<Conflict>,
    pub duration: Duration,
    /// Agent ids, lead first
    pub participants: Vec<String>,
    pub messages: Vec<CollaborationMessage>,
}

impl CollaborationResult {
    pub fn new(lead_id: impl Into<String>) -> Self {
        Self {
            success: false,
            results: HashMap::new(),
            consensus: None,
            conflicts: Vec::new(),
            duration: Duration::ZERO,
            participants: vec![lead_id.into()],
            messages: Vec::new(),
        }
    }

    pub fn lead(&self) -> Option<&str> {
        self.participants.first().map(String::as_str)
    }

    /// Stores a participant's result and adds it to the participants
    pub fn record(&mut self, agent_id: &str, result: TaskResult) {
        if !self.participants.iter().any(|p| p == agent_id) {
            self.participants.push(agent_id.to_string());
        }
        self.results.insert(agent_id.to_string(), result);
    }

    pub fn message(&mut self, message: CollaborationMessage) {
        self.messages.push(message);
    }

    pub fn unresolved_conflicts(&self) -> usize {
        self.conflicts.iter().filter(|c| !c.is_resolved()).count()
    }

    /// Resolves open conflicts with `method` and settles the consensus
    ///
    /// The winner of the first resolved conflict provides the consensus
    /// result. The collaboration succeeds when a successful consensus exists
    /// and no conflict is left open. Returns the number of conflicts resolved.
    pub fn settle(&mut self, method: ResolutionMethod) -> usize {
        let mut resolved = 0;
        for conflict in self.conflicts.iter_mut() {
            if conflict.resolve(method) {
                resolved += 1;
            }
        }

        let winner = self
            .conflicts
            .iter()
            .find_map(|c| c.resolution.as_ref().map(|r| r.winner.clone()));
        if let Some(result) = winner.and_then(|w| self.results.get(&w).cloned()) {
            self.consensus = Some(result);
        }

        self.success = self.unresolved_conflicts() == 0
            && self.consensus.as_ref().is_some_and(|r| r.success);
        resolved
    }
}
