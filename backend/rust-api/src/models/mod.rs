pub mod analytics;
pub mod attempt;
pub mod eligibility;
pub mod grading;
pub mod retry_request;
pub mod retry_settings;
pub mod role;

pub use analytics::{QuizRetryAnalytics, RetryReasonCount, Severity, SuspiciousPattern};
pub use attempt::{
    AttemptStatus, ClientMetadata, CompleteStudyMaterialsRequest, CreateAttemptRequest,
    CreateAttemptResult, QuizAttempt, TeacherApproval, UserScopeQuery,
};
pub use eligibility::{IneligibilityReason, RetryEligibility};
pub use grading::{
    AssignmentType, GradeAttemptRequest, GradeAttemptResponse, GraderIdentity,
    GradingNotificationData, NotificationMessage, QuizInfo, StudentProfile,
};
pub use retry_request::{
    PendingRequestsQuery, QuizRetryRequest, RetryRequestStatus, RetryResolution, ReviewDecision,
    ReviewRequestResult, ReviewRetryRequest,
};
pub use retry_settings::{QuizRetrySettings, RetrySettingsResponse};
pub use role::{Capability, Role};
