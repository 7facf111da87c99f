//! Login and logout hooks
//!
//! The world calls [`Player::on_active`] for players waiting in
//! `LoginQueue` and [`Player::on_inactive`] for players in `LogoutQueue`.
//! Both drive the session state forward exactly one step.

use tracing::{error, info, warn};

use crate::error::Result;
use crate::game::event::{EventBus, GameEvent};
use crate::game::mob::Mob;
use crate::game::persistence::SaveDispatcher;
use crate::game::player::Player;
use crate::game::sync::UpdateFlag;
use crate::net::session::SessionState;
use crate::protocol::messages::{build_assignment, build_logout, build_tab_widget};

/// Sidebar tabs and the widgets opened in them on login
pub const TAB_WIDGETS: [(u8, u16); 13] = [
    (0, 2423),
    (1, 3917),
    (2, 638),
    (3, 3213),
    (4, 1644),
    (5, 5608),
    (6, 1151),
    (8, 5065),
    (9, 5715),
    (10, 2449),
    (11, 904),
    (12, 147),
    (13, 962),
];

/// Collaborators the hooks report to
#[derive(Debug, Clone, Copy)]
pub struct LifecycleContext<'a> {
    pub events: &'a EventBus,
    pub saves: &'a SaveDispatcher,
    /// Membership flag sent in the assignment message
    pub members_world: bool,
}

impl Player {
    /// Finish logging in
    ///
    /// Moves the session to `LoggedIn`, then forces a region load and a
    /// full appearance block on the first tick and sends the login setup
    /// messages. Nothing happens unless the transition succeeds.
    pub fn on_active(&self, ctx: &LifecycleContext<'_>) -> Result<()> {
        let session = self.require_session()?;
        session.advance(SessionState::LoginQueue, SessionState::LoggedIn)?;

        self.flag(UpdateFlag::Region);
        self.flag(UpdateFlag::Appearance);

        session.queue(build_assignment(self.index, ctx.members_world));
        for (tab, widget) in TAB_WIDGETS {
            session.queue(build_tab_widget(tab, widget));
        }

        ctx.events.dispatch(GameEvent::Login {
            player_index: self.index,
            username: self.username.clone(),
        });
        info!(index = self.index, username = %self.username, "Player logged in");
        Ok(())
    }

    /// Finish logging out, or ask the client to log out first
    ///
    /// From `LogoutQueue` this moves the session to `LoggedOut` and queues
    /// a save. The save is not awaited; a closed save queue is logged and
    /// the logout still completes. From any other state the player is told
    /// to log out and stays where it is.
    pub fn on_inactive(&self, ctx: &LifecycleContext<'_>) -> Result<()> {
        let session = self.require_session()?;
        let state = session.state();
        if state != SessionState::LogoutQueue {
            // TODO: decide whether this should force LogoutQueue instead of waiting on the client
            warn!(
                index = self.index,
                username = %self.username,
                state = %state,
                "Deactivated outside the logout queue, sending logout"
            );
            session.queue(build_logout());
            return Ok(());
        }

        session.advance(SessionState::LogoutQueue, SessionState::LoggedOut)?;

        ctx.events.dispatch(GameEvent::Logout {
            player_index: self.index,
            username: self.username.clone(),
        });
        info!(index = self.index, username = %self.username, "Player logged out");

        if let Err(e) = ctx.saves.dispatch(self.to_player_data()) {
            error!(
                index = self.index,
                username = %self.username,
                error = %e,
                "Failed to queue save"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::game::persistence::{MemoryStore, PersistenceWorker, PlayerStore};
    use crate::net::session::Session;
    use crate::protocol::messages::OutgoingOpcode;
    use pretty_assertions::assert_eq;

    fn player_in(state: SessionState) -> (Player, Arc<Session>) {
        let player = Player::new(7, "tester");
        let session = Arc::new(Session::new(1, "127.0.0.1:43594".parse().unwrap()));
        let path = [
            SessionState::Connected,
            SessionState::LoginQueue,
            SessionState::LoggedIn,
            SessionState::LogoutQueue,
            SessionState::LoggedOut,
        ];
        for pair in path.windows(2) {
            if session.state() == state {
                break;
            }
            session.advance(pair[0], pair[1]).unwrap();
        }
        player.set_session(session.clone()).unwrap();
        (player, session)
    }

    #[test]
    fn test_on_active_sequence() {
        let (player, session) = player_in(SessionState::LoginQueue);
        let events = EventBus::default();
        let (saves, _worker) = PersistenceWorker::new(MemoryStore::new());
        let ctx = LifecycleContext {
            events: &events,
            saves: &saves,
            members_world: true,
        };
        let mut rx = events.subscribe();

        player.on_active(&ctx).unwrap();

        assert_eq!(session.state(), SessionState::LoggedIn);
        let flags = player.updates().read().flags;
        assert!(flags.is_flagged(UpdateFlag::Region));
        assert!(flags.is_flagged(UpdateFlag::Appearance));

        let pending = session.pending();
        assert_eq!(pending.len(), 14);
        assert_eq!(pending[0], build_assignment(7, true));
        for (packet, (tab, widget)) in pending[1..].iter().zip(TAB_WIDGETS) {
            assert_eq!(*packet, build_tab_widget(tab, widget));
        }

        assert_eq!(
            rx.try_recv().unwrap(),
            GameEvent::Login {
                player_index: 7,
                username: "tester".to_string()
            }
        );
    }

    #[test]
    fn test_on_active_rejected_when_logged_in() {
        let (player, session) = player_in(SessionState::LoggedIn);
        let events = EventBus::default();
        let (saves, _worker) = PersistenceWorker::new(MemoryStore::new());
        let ctx = LifecycleContext {
            events: &events,
            saves: &saves,
            members_world: true,
        };

        let err = player.on_active(&ctx).unwrap_err();
        assert!(err.to_string().contains("LoginQueue"));
        assert_eq!(session.state(), SessionState::LoggedIn);
        assert_eq!(session.pending_count(), 0);
        assert!(!player.updates().read().flags.any_flagged());
        assert_eq!(events.dispatched(), 0);
    }

    #[test]
    fn test_on_active_without_session() {
        let player = Player::new(1, "ghost");
        let events = EventBus::default();
        let (saves, _worker) = PersistenceWorker::new(MemoryStore::new());
        let ctx = LifecycleContext {
            events: &events,
            saves: &saves,
            members_world: false,
        };
        assert!(player.on_active(&ctx).is_err());
    }

    #[tokio::test]
    async fn test_on_inactive_logs_out_and_saves() {
        let (player, session) = player_in(SessionState::LogoutQueue);
        let events = EventBus::default();
        let store = Arc::new(MemoryStore::new());
        let (saves, worker) = PersistenceWorker::new(store.clone());
        let ctx = LifecycleContext {
            events: &events,
            saves: &saves,
            members_world: true,
        };

        player.on_inactive(&ctx).unwrap();
        assert_eq!(session.state(), SessionState::LoggedOut);
        assert_eq!(events.dispatched(), 1);

        drop(saves);
        assert_eq!(worker.run().await, 1);
        assert!(store.load("tester").await.unwrap().is_some());
    }

    #[test]
    fn test_on_inactive_completes_without_save_queue() {
        let (player, session) = player_in(SessionState::LogoutQueue);
        let events = EventBus::default();
        let (saves, worker) = PersistenceWorker::new(MemoryStore::new());
        drop(worker);
        let ctx = LifecycleContext {
            events: &events,
            saves: &saves,
            members_world: true,
        };

        player.on_inactive(&ctx).unwrap();
        assert_eq!(session.state(), SessionState::LoggedOut);
        assert_eq!(events.dispatched(), 1);
    }

    #[test]
    fn test_concurrent_logout_dispatches_once() {
        let (player, session) = player_in(SessionState::LogoutQueue);
        let events = EventBus::default();
        let (saves, _worker) = PersistenceWorker::new(MemoryStore::new());
        let ctx = LifecycleContext {
            events: &events,
            saves: &saves,
            members_world: true,
        };

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    let _ = player.on_inactive(&ctx);
                });
            }
        });

        assert_eq!(session.state(), SessionState::LoggedOut);
        assert_eq!(events.dispatched(), 1);
    }

    #[test]
    fn test_on_inactive_outside_logout_queue() {
        let (player, session) = player_in(SessionState::LoggedIn);
        let events = EventBus::default();
        let (saves, _worker) = PersistenceWorker::new(MemoryStore::new());
        let ctx = LifecycleContext {
            events: &events,
            saves: &saves,
            members_world: true,
        };

        player.on_inactive(&ctx).unwrap();
        assert_eq!(session.state(), SessionState::LoggedIn);
        let pending = session.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].opcode, OutgoingOpcode::Logout.as_u8());
        assert_eq!(events.dispatched(), 0);
    }
}
