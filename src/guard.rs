//! Anti-abuse guard: single-active-session enforcement and the admin-only
//! simulation override registry.

use crate::errors::{EngineError, EngineResult};
use crate::types::{OverrideMode, OverrideScope, SimulationOverride};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

/// Enforces at most one non-terminal session per player and hands out
/// simulation overrides to sessions they apply to.
pub struct AntiAbuseGuard {
    /// player id -> the session currently holding the slot.
    active: DashMap<String, Uuid>,
    overrides: DashMap<OverrideScope, SimulationOverride>,
}

impl AntiAbuseGuard {
    pub fn new() -> Self {
        Self {
            active: DashMap::new(),
            overrides: DashMap::new(),
        }
    }

    /// Claim the player's single session slot. The claim happens at the same
    /// atomicity boundary as session creation: the entry API either inserts
    /// or observes the existing holder, never both.
    pub fn try_acquire(&self, player_id: &str, session_id: Uuid) -> EngineResult<()> {
        match self.active.entry(player_id.to_string()) {
            Entry::Occupied(entry) => Err(EngineError::SessionAlreadyActive {
                player_id: player_id.to_string(),
                session_id: *entry.get(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(session_id);
                Ok(())
            }
        }
    }

    /// Release the slot when a session reaches a terminal state. Only the
    /// holding session may release it.
    pub fn release(&self, player_id: &str, session_id: Uuid) {
        self.active
            .remove_if(player_id, |_, held| *held == session_id);
    }

    pub fn active_session(&self, player_id: &str) -> Option<Uuid> {
        self.active.get(player_id).map(|entry| *entry.value())
    }

    /// Install or replace an override for its scope.
    pub fn set_override(&self, simulation: SimulationOverride) {
        tracing::info!(scope = ?simulation.scope, mode = ?simulation.mode, uses = simulation.remaining_uses, "simulation override installed");
        self.overrides.insert(simulation.scope.clone(), simulation);
    }

    pub fn clear_override(&self, scope: &OverrideScope) -> bool {
        self.overrides.remove(scope).is_some()
    }

    /// Consume one use of the override in scope for this player, if any.
    /// Player-scoped overrides take precedence over the global one. The
    /// remaining-uses counter decrements exactly once per affected session
    /// and the override auto-disables at zero.
    pub fn take_for_session(&self, player_id: &str) -> Option<OverrideMode> {
        let scopes = [
            OverrideScope::Player(player_id.to_string()),
            OverrideScope::Global,
        ];
        for scope in scopes {
            let mode = {
                let mut entry = match self.overrides.get_mut(&scope) {
                    Some(entry) => entry,
                    None => continue,
                };
                if entry.remaining_uses == 0 {
                    None
                } else {
                    entry.remaining_uses -= 1;
                    Some((entry.mode, entry.remaining_uses))
                }
            };
            match mode {
                Some((mode, remaining)) => {
                    if remaining == 0 {
                        self.overrides.remove(&scope);
                        tracing::info!(scope = ?scope, "simulation override exhausted");
                    }
                    return Some(mode);
                }
                None => {
                    self.overrides.remove(&scope);
                }
            }
        }
        None
    }
}

impl Default for AntiAbuseGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_session_per_player() {
        let guard = AntiAbuseGuard::new();
        let first = Uuid::new_v4();
        guard.try_acquire("p1", first).unwrap();

        let err = guard.try_acquire("p1", Uuid::new_v4()).unwrap_err();
        match err {
            EngineError::SessionAlreadyActive { session_id, .. } => {
                assert_eq!(session_id, first)
            }
            other => panic!("unexpected error: {}", other),
        }

        // Other players are unaffected.
        guard.try_acquire("p2", Uuid::new_v4()).unwrap();
    }

    #[test]
    fn test_release_frees_slot() {
        let guard = AntiAbuseGuard::new();
        let session = Uuid::new_v4();
        guard.try_acquire("p1", session).unwrap();
        guard.release("p1", session);
        guard.try_acquire("p1", Uuid::new_v4()).unwrap();
    }

    #[test]
    fn test_release_requires_holder() {
        let guard = AntiAbuseGuard::new();
        let session = Uuid::new_v4();
        guard.try_acquire("p1", session).unwrap();
        // A stale release from a different session must not free the slot.
        guard.release("p1", Uuid::new_v4());
        assert_eq!(guard.active_session("p1"), Some(session));
    }

    #[test]
    fn test_override_scoping_and_exhaustion() {
        let guard = AntiAbuseGuard::new();
        guard.set_override(SimulationOverride {
            scope: OverrideScope::Global,
            mode: OverrideMode::AlwaysLose,
            remaining_uses: 1,
        });
        guard.set_override(SimulationOverride {
            scope: OverrideScope::Player("p1".to_string()),
            mode: OverrideMode::AlwaysWin,
            remaining_uses: 2,
        });

        // Player scope beats global.
        assert_eq!(guard.take_for_session("p1"), Some(OverrideMode::AlwaysWin));
        // Global applies to other players and auto-disables after one use.
        assert_eq!(guard.take_for_session("p2"), Some(OverrideMode::AlwaysLose));
        assert_eq!(guard.take_for_session("p2"), None);
        // Player override has one use left, then disables.
        assert_eq!(guard.take_for_session("p1"), Some(OverrideMode::AlwaysWin));
        assert_eq!(guard.take_for_session("p1"), None);
    }

    #[test]
    fn test_clear_override() {
        let guard = AntiAbuseGuard::new();
        guard.set_override(SimulationOverride {
            scope: OverrideScope::Global,
            mode: OverrideMode::ForceZeroAtDraw { draw_index: 3 },
            remaining_uses: 10,
        });
        assert!(guard.clear_override(&OverrideScope::Global));
        assert_eq!(guard.take_for_session("p1"), None);
    }
}
