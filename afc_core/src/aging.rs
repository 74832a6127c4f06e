//! Aging bookkeeping: correction-index thresholds and accumulated mitigations.

use crate::flags::AgingFlags;
use crate::nvm::PersistedState;
use crate::params::AgingCfg;

/// Flags implied by the highest correction index over all stages.
pub fn flags_for_highest(cfg: &AgingCfg, highest: u8) -> AgingFlags {
    let mut f = AgingFlags::empty();
    f.set(AgingFlags::EARLY_WARNING, highest >= cfg.early_warning_corr_idx);
    f.set(AgingFlags::ABNORMAL, highest >= cfg.abnormal_corr_idx);
    f.set(AgingFlags::EXTREME, highest >= cfg.extreme_corr_idx);
    f
}

/// Fold the session's per-stage highest indices into the lifetime total,
/// then clear them. Latches end of life at the configured limit.
///
/// Returns true if end of life was newly reached.
pub fn close_session(cfg: &AgingCfg, state: &mut PersistedState) -> bool {
    let added: u32 = state
        .highest_corr_idx
        .iter()
        .map(|&h| u32::from(h.min(cfg.mitigation_cap_per_stage)))
        .sum();
    let total = u32::from(state.total_mitigations).saturating_add(added);
    state.total_mitigations = u16::try_from(total).unwrap_or(u16::MAX);
    state.highest_corr_idx.fill(0);

    let was_eol = state.end_of_life;
    if state.total_mitigations >= cfg.eol_mitigations {
        state.end_of_life = true;
    }
    if state.end_of_life && !was_eol {
        tracing::warn!(total_mitigations = state.total_mitigations, "end of life reached");
    }
    state.end_of_life && !was_eol
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_are_inclusive() {
        let cfg = AgingCfg::default();
        assert_eq!(flags_for_highest(&cfg, 7), AgingFlags::empty());
        assert_eq!(flags_for_highest(&cfg, 8), AgingFlags::EARLY_WARNING);
        assert_eq!(
            flags_for_highest(&cfg, 16),
            AgingFlags::EARLY_WARNING | AgingFlags::ABNORMAL | AgingFlags::EXTREME
        );
    }

    #[test]
    fn per_stage_contribution_is_capped() {
        let cfg = AgingCfg {
            mitigation_cap_per_stage: 10,
            ..AgingCfg::default()
        };
        let mut s = PersistedState::new(3, 1, 4100);
        s.highest_corr_idx = vec![4, 25, 0];
        assert!(!close_session(&cfg, &mut s));
        assert_eq!(s.total_mitigations, 14);
        assert_eq!(s.highest_corr_idx, vec![0, 0, 0]);
    }
}
