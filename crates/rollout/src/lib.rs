//! `cobranzas-rollout` — per-agency collections enablement.
//!
//! Automation is rolled out agency by agency. Each agency may have an
//! explicit override row; agencies without one get a computed default whose
//! polarity is a deployment decision: fail closed (must opt in) or fail open
//! (opt out). Suspension is a hard override that wins over every other flag.
//!
//! This crate is pure flag resolution. The batched store lookup (and its
//! degrade-on-missing-schema behavior) lives in `cobranzas-infra`.

use serde::{Deserialize, Serialize};

use cobranzas_collections::FallbackProvider;
use cobranzas_core::AgencyId;

/// Effective collections rollout for one agency.
///
/// Read-only to the orchestrator; written by the administrative surface.
/// Resolved fresh on every orchestration decision, never cached across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgencyRollout {
    pub agency_id: AgencyId,
    /// Whether an explicit override row exists for this agency.
    pub has_config: bool,
    /// Direct-debit (presentment) automation.
    pub pd_enabled: bool,
    /// Dunning retry automation.
    pub dunning_enabled: bool,
    /// Fallback payment intent creation.
    pub fallback_enabled: bool,
    pub fallback_provider: Option<FallbackProvider>,
    /// Whether scheduled fallback status sync may run for this agency.
    pub fallback_auto_sync_enabled: bool,
    /// Hard override: disables all automation regardless of other flags.
    pub suspended: bool,
    /// Per-agency export cutoff hour override (local, 0-23).
    pub cutoff_override_hour: Option<u32>,
    /// Operator-facing notes.
    pub notes: Option<String>,
}

impl AgencyRollout {
    /// Default applied when no explicit row exists.
    ///
    /// `require_agency_flag = true` fails closed (all automation off until
    /// the agency is opted in); `false` fails open (on until opted out).
    pub fn default_for(agency_id: AgencyId, require_agency_flag: bool) -> Self {
        let enabled = !require_agency_flag;
        Self {
            agency_id,
            has_config: false,
            pd_enabled: enabled,
            dunning_enabled: enabled,
            fallback_enabled: enabled,
            fallback_provider: None,
            fallback_auto_sync_enabled: enabled,
            suspended: false,
            cutoff_override_hour: None,
            notes: None,
        }
    }

    pub fn pd_automation_enabled(&self) -> bool {
        !self.suspended && self.pd_enabled
    }

    pub fn dunning_automation_enabled(&self) -> bool {
        !self.suspended && self.dunning_enabled
    }

    pub fn fallback_automation_enabled(&self) -> bool {
        !self.suspended && self.fallback_enabled
    }

    /// Scheduled fallback sync additionally requires fallback itself.
    pub fn can_auto_sync_fallback(&self) -> bool {
        self.fallback_automation_enabled() && self.fallback_auto_sync_enabled
    }
}

/// Effective export cutoff hour for an agency.
///
/// A per-agency override in 0-23 wins; otherwise a valid global cutoff;
/// otherwise no cutoff is enforced.
pub fn resolve_cutoff_hour(rollout: Option<&AgencyRollout>, global: Option<u32>) -> Option<u32> {
    if let Some(hour) = rollout.and_then(|r| r.cutoff_override_hour) {
        if hour <= 23 {
            return Some(hour);
        }
    }
    global.filter(|h| *h <= 23)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explicit(agency_id: AgencyId) -> AgencyRollout {
        AgencyRollout {
            has_config: true,
            ..AgencyRollout::default_for(agency_id, false)
        }
    }

    #[test]
    fn fail_open_default_enables_everything() {
        let rollout = AgencyRollout::default_for(AgencyId::new(), false);
        assert!(!rollout.has_config);
        assert!(rollout.pd_automation_enabled());
        assert!(rollout.dunning_automation_enabled());
        assert!(rollout.fallback_automation_enabled());
        assert!(rollout.can_auto_sync_fallback());
    }

    #[test]
    fn fail_closed_default_disables_everything() {
        let rollout = AgencyRollout::default_for(AgencyId::new(), true);
        assert!(!rollout.pd_automation_enabled());
        assert!(!rollout.dunning_automation_enabled());
        assert!(!rollout.fallback_automation_enabled());
        assert!(!rollout.can_auto_sync_fallback());
    }

    #[test]
    fn suspension_overrides_every_flag() {
        let rollout = AgencyRollout {
            suspended: true,
            ..explicit(AgencyId::new())
        };
        assert!(!rollout.pd_automation_enabled());
        assert!(!rollout.dunning_automation_enabled());
        assert!(!rollout.fallback_automation_enabled());
        assert!(!rollout.can_auto_sync_fallback());
    }

    #[test]
    fn auto_sync_requires_fallback_enabled() {
        let rollout = AgencyRollout {
            fallback_enabled: false,
            fallback_auto_sync_enabled: true,
            ..explicit(AgencyId::new())
        };
        assert!(!rollout.can_auto_sync_fallback());
    }

    #[test]
    fn agency_cutoff_override_wins() {
        let rollout = AgencyRollout {
            cutoff_override_hour: Some(15),
            ..explicit(AgencyId::new())
        };
        assert_eq!(resolve_cutoff_hour(Some(&rollout), Some(18)), Some(15));
    }

    #[test]
    fn invalid_override_falls_back_to_global() {
        let rollout = AgencyRollout {
            cutoff_override_hour: Some(99),
            ..explicit(AgencyId::new())
        };
        assert_eq!(resolve_cutoff_hour(Some(&rollout), Some(18)), Some(18));
    }

    #[test]
    fn invalid_global_means_no_cutoff() {
        assert_eq!(resolve_cutoff_hour(None, Some(99)), None);
        assert_eq!(resolve_cutoff_hour(None, None), None);
    }
}
