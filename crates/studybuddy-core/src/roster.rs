//! Agent Registry: the fixed roster of agents and the route whitelist.
//!
//! A roster has exactly one entry agent, which is consulted on every turn.
//! The entry agent may hand off to the specialists it names, and may call
//! the tools it names. Specialists are leaves: no handoffs, no tools.
//!
//! Route decisions come from a language model, so they are untrusted
//! strings until [`Roster::resolve_route`] has matched them against the
//! entry agent's whitelist.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::guardrail::parse_json_object;
use crate::tools::BUILTIN_TOOLS;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RosterError {
    #[error("Invalid roster YAML: {0}")]
    Yaml(String),

    #[error("Failed to read roster file: {0}")]
    Io(String),

    #[error("Duplicate agent name: {0}")]
    DuplicateAgent(String),

    #[error("Entry agent '{0}' is not defined")]
    UnknownEntry(String),

    #[error("Agent '{agent}' hands off to undefined agent '{target}'")]
    UnknownHandoff { agent: String, target: String },

    #[error("Specialist '{0}' must be a leaf (no handoffs or tools)")]
    NotALeaf(String),

    #[error("Specialist '{0}' has no handoff description")]
    MissingHandoffDescription(String),

    #[error("Agent '{agent}' declares unknown tool '{tool}'")]
    UnknownTool { agent: String, tool: String },

    #[error("Route decision is malformed: {0}")]
    MalformedDecision(String),

    #[error("Route target '{0}' is not on the whitelist")]
    NotWhitelisted(String),
}

/// Immutable configuration of one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,

    pub instructions: String,

    /// When to delegate to this agent; required for specialists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_description: Option<String>,

    /// Agents this one may delegate to
    #[serde(default)]
    pub handoffs: Vec<String>,

    /// Tools this one may invoke
    #[serde(default)]
    pub tools: Vec<String>,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            handoff_description: None,
            handoffs: Vec::new(),
            tools: Vec::new(),
        }
    }

    pub fn specialist(
        name: impl Into<String>,
        handoff_description: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            handoff_description: Some(handoff_description.into()),
            ..Self::new(name, instructions)
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.handoffs.is_empty() && self.tools.is_empty()
    }
}

/// How the entry agent chose to produce this turn's response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum RouteDecision {
    DirectAnswer,
    ToolCall { tool: String },
    Delegate { agent: String },
}

impl std::fmt::Display for RouteDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteDecision::DirectAnswer => write!(f, "direct"),
            RouteDecision::ToolCall { tool } => write!(f, "tool:{}", tool),
            RouteDecision::Delegate { agent } => write!(f, "delegate:{}", agent),
        }
    }
}

/// An unvalidated route decision as emitted by the router model.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawRoute {
    /// `direct`, `tool` or `delegate`
    pub route: String,

    #[serde(default)]
    pub target: Option<String>,
}

/// On-disk shape of a roster: an entry name plus a flat list of agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterFile {
    /// Name of the agent entered on every turn
    pub entry: String,

    pub agents: Vec<AgentSpec>,
}

/// The validated set of agents available to a session.
///
/// Only constructible through validation, so the entry agent always exists
/// and every specialist is a leaf with a handoff description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RosterFile", into = "RosterFile")]
pub struct Roster {
    entry: AgentSpec,
    specialists: Vec<AgentSpec>,
}

impl TryFrom<RosterFile> for Roster {
    type Error = RosterError;

    fn try_from(file: RosterFile) -> Result<Self, Self::Error> {
        let mut seen = HashSet::new();
        for agent in &file.agents {
            if !seen.insert(canonical(&agent.name)) {
                return Err(RosterError::DuplicateAgent(agent.name.clone()));
            }
        }

        let find = |name: &str| file.agents.iter().find(|a| canonical(&a.name) == canonical(name));

        let entry = find(&file.entry)
            .cloned()
            .ok_or_else(|| RosterError::UnknownEntry(file.entry.clone()))?;

        for tool in &entry.tools {
            if !BUILTIN_TOOLS.contains(&tool.as_str()) {
                return Err(RosterError::UnknownTool {
                    agent: entry.name.clone(),
                    tool: tool.clone(),
                });
            }
        }

        let mut specialists = Vec::with_capacity(entry.handoffs.len());
        for target in &entry.handoffs {
            let specialist = find(target).ok_or_else(|| RosterError::UnknownHandoff {
                agent: entry.name.clone(),
                target: target.clone(),
            })?;

            if canonical(&specialist.name) == canonical(&entry.name) || !specialist.is_leaf() {
                return Err(RosterError::NotALeaf(specialist.name.clone()));
            }
            if specialist.handoff_description.is_none() {
                return Err(RosterError::MissingHandoffDescription(specialist.name.clone()));
            }
            specialists.push(specialist.clone());
        }

        let unreachable = file.agents.len().saturating_sub(1 + specialists.len());
        if unreachable > 0 {
            tracing::warn!(count = unreachable, "Roster defines agents the entry agent cannot reach");
        }

        Ok(Roster { entry, specialists })
    }
}

impl From<Roster> for RosterFile {
    fn from(roster: Roster) -> Self {
        let mut agents = vec![roster.entry.clone()];
        agents.extend(roster.specialists);
        RosterFile {
            entry: roster.entry.name,
            agents,
        }
    }
}

impl Roster {
    /// Build and validate a roster.
    pub fn new(entry: impl Into<String>, agents: Vec<AgentSpec>) -> Result<Self, RosterError> {
        RosterFile {
            entry: entry.into(),
            agents,
        }
        .try_into()
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, RosterError> {
        let file: RosterFile = serde_yaml::from_str(yaml).map_err(|e| RosterError::Yaml(e.to_string()))?;
        file.try_into()
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, RosterError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| RosterError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&yaml)
    }

    /// The agent entered on every turn.
    pub fn entry_agent(&self) -> &AgentSpec {
        &self.entry
    }

    /// Look up an agent by name. Matching ignores case, `_` and `-`.
    pub fn agent(&self, name: &str) -> Option<&AgentSpec> {
        let wanted = canonical(name);
        std::iter::once(&self.entry)
            .chain(&self.specialists)
            .find(|a| canonical(&a.name) == wanted)
    }

    /// Specialists the entry agent may delegate to, in declaration order.
    pub fn specialists(&self) -> impl Iterator<Item = &AgentSpec> {
        self.specialists.iter()
    }

    /// Validate an untrusted route decision against the entry agent's whitelist.
    pub fn resolve_route(&self, raw: &RawRoute) -> Result<RouteDecision, RosterError> {
        let target = raw.target.as_deref().map(str::trim).filter(|t| !t.is_empty());

        match canonical(&raw.route).as_str() {
            "direct" | "direct answer" | "answer" => Ok(RouteDecision::DirectAnswer),
            "tool" | "tool call" => {
                let target = target.ok_or_else(|| {
                    RosterError::MalformedDecision("tool route without a target".to_string())
                })?;
                self.entry
                    .tools
                    .iter()
                    .find(|t| canonical(t) == canonical(target))
                    .map(|tool| RouteDecision::ToolCall { tool: tool.clone() })
                    .ok_or_else(|| RosterError::NotWhitelisted(target.to_string()))
            }
            "delegate" | "handoff" => {
                let target = target.ok_or_else(|| {
                    RosterError::MalformedDecision("delegate route without a target".to_string())
                })?;
                self.specialists
                    .iter()
                    .find(|a| canonical(&a.name) == canonical(target))
                    .map(|agent| RouteDecision::Delegate {
                        agent: agent.name.clone(),
                    })
                    .ok_or_else(|| RosterError::NotWhitelisted(target.to_string()))
            }
            other => Err(RosterError::MalformedDecision(format!("unknown route kind '{}'", other))),
        }
    }

    /// Parse router model output (bare or fenced JSON) and resolve it.
    pub fn parse_route(&self, raw: &str) -> Result<RouteDecision, RosterError> {
        let value = parse_json_object(raw).map_err(|e| RosterError::MalformedDecision(e.to_string()))?;
        let route: RawRoute =
            serde_json::from_value(value).map_err(|e| RosterError::MalformedDecision(e.to_string()))?;
        self.resolve_route(&route)
    }
}

impl Default for Roster {
    fn default() -> Self {
        default_roster()
    }
}

fn canonical(name: &str) -> String {
    name.split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Name of the default entry agent.
pub const STUDY_BUDDY: &str = "StudyBuddy";

const STUDY_BUDDY_INSTRUCTIONS: &str = "You are a helpful and knowledgeable study assistant. \
Give clear, precise and well-informed answers about academic learning, technology, science, \
programming and general knowledge.
You may answer:
- questions about the developer (use the developer_info tool)
- basic discussion
- educational, technical and programming questions
- study topics from any academic field
- research-related or factual queries
Politely decline personal, social or entertainment-focused topics, inappropriate or harmful \
content, and requests unrelated to learning.
Stay helpful, focused and safe.";

fn default_roster() -> Roster {
    let specialists = vec![
        AgentSpec::specialist(
            "Text Summarizer",
            "Generates concise summaries from raw text or documents (PDF, DOCX, TXT) with customizable tone and length.",
            "Summarize the given text or document content. Default to roughly one quarter of the \
             original length in plain text, or the format the user asks for. Stay on topic and add nothing \
             that is not in the source.",
        ),
        AgentSpec::specialist(
            "Concept Explainer",
            "Explains complex concepts from text or documents (PDF, DOCX, TXT) with adjustable depth and audience focus.",
            "Explain the concept the user asks about, clearly and in context, in plain text. Stay on \
             the requested concept.",
        ),
        AgentSpec::specialist(
            "Quiz Generator",
            "Generates quizzes on any topic with customizable difficulty, format, and flexible question count (default: 10).",
            "Generate a quiz. Default to 10 questions of moderate difficulty unless the user says \
             otherwise. Each question has four options; list the answers, numbered, after all questions.",
        ),
        AgentSpec::specialist(
            "Text Translator",
            "Translates text or content from files (PDF, DOCX, TXT) into any target language with optional auto-detection.",
            "Translate the text into the language the user requests. Return plain text only.",
        ),
        AgentSpec::specialist(
            "Definition Lookup",
            "Finds accurate definitions from text or documents (PDF, DOCX, TXT) or general knowledge, with usage examples.",
            "Give a clear, accurate definition of the requested term. Prefer the definition found in \
             supplied file content; otherwise give the most appropriate general definition and its source.",
        ),
        AgentSpec::specialist(
            "Flashcard Generator",
            "Generates smart flashcards from topics or files (PDF, DOCX, TXT) in Q&A, cloze, or definition formats.",
            "Turn the study material into focused question and answer flashcards grouped by topic. \
             Avoid duplicates and non-educational content.",
        ),
        AgentSpec::specialist(
            "Study Scheduler",
            "Generates personalized study plans from goals or files, based on deadlines, availability, and preferences.",
            "Build a practical, balanced study schedule from the user's subjects, goals, deadlines and \
             availability. Keep Sundays free unless the user asks otherwise.",
        ),
        AgentSpec::specialist(
            "Code Explainer",
            "Explains and optionally debugs code from input or files (e.g. .py, .cpp, .js).",
            "Explain the purpose and logic of the code step by step, detect its language, point out \
             bugs and suggest fixes. Ask for clarification when the code is ambiguous.",
        ),
        AgentSpec::specialist(
            "Math Solver",
            "Solves math problems with step-by-step reasoning for algebra, calculus, linear algebra and more.",
            "Solve each math problem step by step, explaining formulas and substitutions. Handle \
             multiple problems one at a time.",
        ),
        AgentSpec::specialist(
            "Research Assistant",
            "Finds and summarizes credible sources to support deep research.",
            "Help gather, organize and summarize research on the topic. Highlight key findings and gaps, \
             and cite sources in the requested style.",
        ),
    ];

    let mut entry = AgentSpec::new(STUDY_BUDDY, STUDY_BUDDY_INSTRUCTIONS);
    entry.handoffs = specialists.iter().map(|a| a.name.clone()).collect();
    entry.tools = BUILTIN_TOOLS.iter().map(|t| t.to_string()).collect();

    Roster { entry, specialists }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::DEVELOPER_INFO;

    #[test]
    fn test_default_roster_is_valid() {
        let roster = Roster::default();
        assert_eq!(Roster::try_from(RosterFile::from(roster.clone())).unwrap(), roster);
        assert_eq!(roster.entry_agent().name, STUDY_BUDDY);
        assert_eq!(roster.specialists().count(), 10);
        assert!(roster.specialists().all(AgentSpec::is_leaf));
        assert_eq!(roster.entry_agent().tools, vec![DEVELOPER_INFO.to_string()]);
    }

    #[test]
    fn test_resolve_delegate_is_whitelisted() {
        let roster = Roster::default();
        let route = RawRoute {
            route: "delegate".to_string(),
            target: Some("quiz_generator".to_string()),
        };
        assert_eq!(
            roster.resolve_route(&route).unwrap(),
            RouteDecision::Delegate {
                agent: "Quiz Generator".to_string()
            }
        );
    }

    #[test]
    fn test_resolve_rejects_unknown_agent() {
        let roster = Roster::default();
        let route = RawRoute {
            route: "delegate".to_string(),
            target: Some("Shell Executor".to_string()),
        };
        assert_eq!(
            roster.resolve_route(&route).unwrap_err(),
            RosterError::NotWhitelisted("Shell Executor".to_string())
        );
    }

    #[test]
    fn test_resolve_rejects_delegating_to_entry() {
        let roster = Roster::default();
        let route = RawRoute {
            route: "delegate".to_string(),
            target: Some("StudyBuddy".to_string()),
        };
        assert!(matches!(
            roster.resolve_route(&route),
            Err(RosterError::NotWhitelisted(_))
        ));
    }

    #[test]
    fn test_parse_route_variants() {
        let roster = Roster::default();
        assert_eq!(
            roster.parse_route(r#"{"route": "direct"}"#).unwrap(),
            RouteDecision::DirectAnswer
        );
        assert_eq!(
            roster
                .parse_route("```json\n{\"route\": \"tool\", \"target\": \"developer_info\"}\n```")
                .unwrap(),
            RouteDecision::ToolCall {
                tool: DEVELOPER_INFO.to_string()
            }
        );
        assert!(matches!(
            roster.parse_route(r#"{"route": "tool", "target": "shell"}"#),
            Err(RosterError::NotWhitelisted(_))
        ));
        assert!(matches!(
            roster.parse_route("just answer it"),
            Err(RosterError::MalformedDecision(_))
        ));
        assert!(matches!(
            roster.parse_route(r#"{"route": "delegate"}"#),
            Err(RosterError::MalformedDecision(_))
        ));
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
entry: Tutor
agents:
  - name: Tutor
    instructions: Help students.
    handoffs: [Quizzer]
    tools: [developer_info]
  - name: Quizzer
    instructions: Write quizzes.
    handoff_description: Generates quizzes.
"#;
        let roster = Roster::from_yaml(yaml).unwrap();
        assert_eq!(roster.entry_agent().name, "Tutor");
        assert_eq!(roster.specialists().next().unwrap().name, "Quizzer");
    }

    #[test]
    fn test_yaml_validation_errors() {
        let missing_target = r#"
entry: Tutor
agents:
  - name: Tutor
    instructions: Help.
    handoffs: [Ghost]
"#;
        assert!(matches!(
            Roster::from_yaml(missing_target),
            Err(RosterError::UnknownHandoff { .. })
        ));

        let nested = r#"
entry: Tutor
agents:
  - name: Tutor
    instructions: Help.
    handoffs: [Quizzer]
  - name: Quizzer
    instructions: Quiz.
    handoff_description: Quizzes.
    handoffs: [Tutor]
"#;
        assert_eq!(
            Roster::from_yaml(nested).unwrap_err(),
            RosterError::NotALeaf("Quizzer".to_string())
        );

        let bad_tool = r#"
entry: Tutor
agents:
  - name: Tutor
    instructions: Help.
    tools: [web_search]
"#;
        assert!(matches!(
            Roster::from_yaml(bad_tool),
            Err(RosterError::UnknownTool { .. })
        ));

        let duplicate = r#"
entry: Tutor
agents:
  - name: Tutor
    instructions: Help.
  - name: tutor
    instructions: Help again.
"#;
        assert!(matches!(
            Roster::from_yaml(duplicate),
            Err(RosterError::DuplicateAgent(_))
        ));

        assert!(matches!(Roster::from_yaml("entry: [unclosed"), Err(RosterError::Yaml(_))));
    }

    #[test]
    fn test_from_yaml_file_missing() {
        assert!(matches!(
            Roster::from_yaml_file("/nonexistent/roster.yaml"),
            Err(RosterError::Io(_))
        ));
    }
}
