use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Teacher,
    Admin,
}

/// Elevated actions gated by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ConfigureQuizzes,
    GradeAttempts,
    ReviewRetryRequests,
    InspectStudents,
    ViewCourseAnalytics,
    ViewPlatformAnalytics,
}

impl Capability {
    pub fn describe(self) -> &'static str {
        match self {
            Capability::ConfigureQuizzes => "configure quiz retry settings",
            Capability::GradeAttempts => "grade quiz attempts",
            Capability::ReviewRetryRequests => "review retry requests",
            Capability::InspectStudents => "inspect other students",
            Capability::ViewCourseAnalytics => "view quiz analytics",
            Capability::ViewPlatformAnalytics => "view platform analytics",
        }
    }
}

impl Role {
    pub fn allows(self, capability: Capability) -> bool {
        match self {
            Role::Admin => true,
            Role::Teacher => !matches!(capability, Capability::ViewPlatformAnalytics),
            Role::Student => false,
        }
    }
}
