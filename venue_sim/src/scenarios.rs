//! Named simulation scenarios.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// VEN-001: no fires, normal arrivals
    SteadyService,

    /// VEN-002: frequent fires with a short closure
    FireDrill,

    /// VEN-003: injected reply write failures
    FlakyReplies,

    /// VEN-004: every group is larger than every table
    OversizedGroups,

    /// VEN-005: arrivals far faster than the concurrency cap allows
    RushHour,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SteadyService,
            ScenarioId::FireDrill,
            ScenarioId::FlakyReplies,
            ScenarioId::OversizedGroups,
            ScenarioId::RushHour,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SteadyService => "steady_service",
            ScenarioId::FireDrill => "fire_drill",
            ScenarioId::FlakyReplies => "flaky_replies",
            ScenarioId::OversizedGroups => "oversized_groups",
            ScenarioId::RushHour => "rush_hour",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SteadyService => "No fires; table and counter invariants hold at the end",
            ScenarioId::FireDrill => "Fire every few seconds; venue evacuates, reopens and rebuilds its tables",
            ScenarioId::FlakyReplies => "Bursts of failed reply writes; every group still terminates",
            ScenarioId::OversizedGroups => "Groups larger than any table; every request is rejected",
            ScenarioId::RushHour => "Near-continuous arrivals; live groups never exceed the cap",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "steady_service" | "steadyservice" | "ven-001" => Ok(ScenarioId::SteadyService),
            "fire_drill" | "firedrill" | "ven-002" => Ok(ScenarioId::FireDrill),
            "flaky_replies" | "flakyreplies" | "ven-003" => Ok(ScenarioId::FlakyReplies),
            "oversized_groups" | "oversizedgroups" | "ven-004" => Ok(ScenarioId::OversizedGroups),
            "rush_hour" | "rushhour" | "ven-005" => Ok(ScenarioId::RushHour),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
