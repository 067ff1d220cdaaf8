//! Messages exchanged between clients, the broker and workers.
//!
//! Field names and byte encodings match the wire format already spoken by
//! deployed clients: `ProblemID`/`Data` and `Id`/`Targz`, with byte payloads
//! carried as standard base64 strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Prefix of the final message carrying a verdict.
pub const VERDICT_PREFIX: &str = "VEREDICT";
/// Prefix of the final message carrying an error.
pub const ERROR_PREFIX: &str = "ERROR";

/// A candidate solution for a problem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Problem identifier, a path relative to one of the problem roots.
    #[serde(rename = "ProblemID")]
    pub problem_id: String,
    /// Raw solution payload.
    #[serde(rename = "Data", with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Submission {
    pub fn new(problem_id: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            problem_id: problem_id.into(),
            data: data.into(),
        }
    }

    /// The synthetic job used to check on an idle worker.
    pub fn liveness() -> Self {
        Self::new("", Vec::new())
    }

    pub fn is_liveness(&self) -> bool {
        self.problem_id.is_empty()
    }
}

/// Problem contents shipped to a worker that does not have them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "Id")]
    pub id: String,
    /// gzip-compressed tar archive of the problem directory.
    #[serde(rename = "Targz", with = "base64_bytes")]
    pub targz: Vec<u8>,
}

/// Anything the broker may send down a worker connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToWorker {
    Submission(Submission),
    Problem(Problem),
}

/// First reply of a worker after receiving a submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerReply {
    /// Answer to a liveness check; the job is dropped.
    Alive,
    /// The worker lacks the problem contents.
    SendProblem,
    /// The worker already has everything it needs.
    Ok,
}

impl WorkerReply {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alive => "alive",
            Self::SendProblem => "send problem",
            Self::Ok => "ok",
        }
    }
}

impl fmt::Display for WorkerReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseReplyError {
    pub invalid: String,
}

impl fmt::Display for ParseReplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unexpected worker reply '{}'", self.invalid)
    }
}

impl std::error::Error for ParseReplyError {}

impl FromStr for WorkerReply {
    type Err = ParseReplyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alive" => Ok(Self::Alive),
            "send problem" => Ok(Self::SendProblem),
            "ok" => Ok(Self::Ok),
            _ => Err(ParseReplyError {
                invalid: s.to_string(),
            }),
        }
    }
}

/// A message on a job's update stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Update {
    Progress(String),
    /// Verdict text with the `VEREDICT\n` prefix removed.
    Verdict(String),
    /// Error message, prefix kept.
    Error(String),
}

impl Update {
    pub fn classify(msg: &str) -> Self {
        if let Some(rest) = msg.strip_prefix(VERDICT_PREFIX) {
            let text = rest.strip_prefix('\n').unwrap_or(rest);
            Self::Verdict(text.to_string())
        } else if msg.starts_with(ERROR_PREFIX) {
            Self::Error(msg.to_string())
        } else {
            Self::Progress(msg.to_string())
        }
    }

    /// Whether `msg` closes an update stream.
    pub fn is_final(msg: &str) -> bool {
        msg.starts_with(VERDICT_PREFIX) || msg.starts_with(ERROR_PREFIX)
    }

    pub fn verdict(text: &str) -> String {
        format!("{VERDICT_PREFIX}\n{text}")
    }

    pub fn error(context: &str, err: impl fmt::Display) -> String {
        format!("{ERROR_PREFIX}: {context}: {err}")
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    // A nil byte slice is sent as `null`.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => STANDARD.decode(text).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_wire_format() {
        let submission = Submission::new("cpp/sum", b"int main(){}".to_vec());
        let json = serde_json::to_value(&submission).unwrap();
        assert_eq!(json["ProblemID"], "cpp/sum");
        assert_eq!(json["Data"], "aW50IG1haW4oKXt9");
    }

    #[test]
    fn test_submission_null_data() {
        let parsed: Submission =
            serde_json::from_str(r#"{"ProblemID":"","Data":null}"#).unwrap();
        assert!(parsed.is_liveness());
        assert!(parsed.data.is_empty());
    }

    #[test]
    fn test_to_worker_distinguishes_messages() {
        let problem = ToWorker::Problem(Problem {
            id: "p".into(),
            targz: vec![1, 2, 3],
        });
        let json = serde_json::to_string(&problem).unwrap();
        assert_eq!(serde_json::from_str::<ToWorker>(&json).unwrap(), problem);

        let ping = ToWorker::Submission(Submission::liveness());
        let json = serde_json::to_string(&ping).unwrap();
        assert_eq!(serde_json::from_str::<ToWorker>(&json).unwrap(), ping);
    }

    #[test]
    fn test_worker_reply_from_str() {
        assert_eq!("alive".parse::<WorkerReply>().unwrap(), WorkerReply::Alive);
        assert_eq!(
            "send problem".parse::<WorkerReply>().unwrap(),
            WorkerReply::SendProblem
        );
        assert_eq!("ok".parse::<WorkerReply>().unwrap(), WorkerReply::Ok);
        assert!("need targz".parse::<WorkerReply>().is_err());
    }

    #[test]
    fn test_update_classify() {
        assert_eq!(
            Update::classify("Compiling..."),
            Update::Progress("Compiling...".into())
        );
        assert_eq!(
            Update::classify("VEREDICT\nAccepted\n"),
            Update::Verdict("Accepted\n".into())
        );
        assert_eq!(
            Update::classify("ERROR: Eval error: boom"),
            Update::Error("ERROR: Eval error: boom".into())
        );
    }

    #[test]
    fn test_update_builders_are_final() {
        assert!(Update::is_final(&Update::verdict("ok")));
        assert!(Update::is_final(&Update::error("Eval error", "boom")));
        assert!(!Update::is_final("Test 1... passed"));
        assert_eq!(Update::error("Eval error", "boom"), "ERROR: Eval error: boom");
    }
}
