use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The parsed content of one feedback line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Payload {
    Text(String),
    Numbers(Vec<OrderedFloat<f64>>),
}

impl Payload {
    pub fn text(value: &str) -> Self {
        Payload::Text(value.to_string())
    }

    pub fn numbers(values: &[f64]) -> Self {
        Payload::Numbers(values.iter().map(|v| OrderedFloat(*v)).collect())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Numbers(_) => None,
        }
    }

    pub fn as_numbers(&self) -> Option<Vec<f64>> {
        match self {
            Payload::Text(_) => None,
            Payload::Numbers(values) => Some(values.iter().map(|v| v.into_inner()).collect()),
        }
    }

    /// Numeric closeness test, same rule as Python's `math.isclose`.
    /// Text payloads fall back to exact equality.
    pub fn is_close(&self, other: &Payload, rel_tol: f64, abs_tol: f64) -> bool {
        match (self, other) {
            (Payload::Numbers(a), Payload::Numbers(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| {
                        let (x, y) = (x.into_inner(), y.into_inner());
                        (x - y).abs() <= f64::max(rel_tol * f64::max(x.abs(), y.abs()), abs_tol)
                    })
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Text(text) => write!(f, "{}", text),
            Payload::Numbers(values) => {
                let inner = values
                    .iter()
                    .map(|v| v.into_inner().to_string())
                    .collect::<Vec<String>>()
                    .join(",");
                write!(f, "[{}]", inner)
            }
        }
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::text(value)
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<Vec<f64>> for Payload {
    fn from(values: Vec<f64>) -> Self {
        Payload::numbers(&values)
    }
}

/// One entry of the message store. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sequence_number: u64,
    pub payload: Payload,
}

/// How an expected token is compared against stored payloads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Matching {
    Exact,
    Tolerance { rel_tol: f64, abs_tol: f64 },
}

impl Default for Matching {
    fn default() -> Self {
        Matching::Exact
    }
}

/// A payload whose appearance in the store marks a point in script execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckToken {
    pub payload: Payload,
    #[serde(default)]
    pub matching: Matching,
}

impl AckToken {
    pub fn exact<P: Into<Payload>>(payload: P) -> Self {
        Self {
            payload: payload.into(),
            matching: Matching::Exact,
        }
    }

    /// Pose-style token compared with a numeric tolerance.
    pub fn close_to(values: &[f64], abs_tol: f64) -> Self {
        Self {
            payload: Payload::numbers(values),
            matching: Matching::Tolerance {
                rel_tol: 1e-9,
                abs_tol,
            },
        }
    }

    pub fn matches(&self, payload: &Payload) -> bool {
        match self.matching {
            Matching::Exact => &self.payload == payload,
            Matching::Tolerance { rel_tol, abs_tol } => {
                self.payload.is_close(payload, rel_tol, abs_tol)
            }
        }
    }
}

impl fmt::Display for AckToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.payload)
    }
}

/// The pair of tokens a task waits for: one when the controller picked the
/// script up, one when it ran to the end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAcks {
    pub received: AckToken,
    pub completed: Option<AckToken>,
}

impl TaskAcks {
    pub fn new(received: AckToken, completed: Option<AckToken>) -> Self {
        Self {
            received,
            completed,
        }
    }

    /// `Task_<key>_received` / `Task_<key>_complete`.
    pub fn for_key(key: u64) -> Self {
        Self {
            received: AckToken::exact(format!("Task_{}_received", key)),
            completed: Some(AckToken::exact(format!("Task_{}_complete", key))),
        }
    }
}
