use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryReasonCount {
    pub reason: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspiciousPattern {
    pub pattern: String,
    pub description: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuizRetryAnalytics {
    pub total_attempts: u32,
    pub retry_attempts: u32,
    pub average_attempts: f64,
    pub retry_success_rate: f64,
    pub common_retry_reasons: Vec<RetryReasonCount>,
    pub suspicious_patterns: Vec<SuspiciousPattern>,
}
