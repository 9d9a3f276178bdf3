//! The service-entry dispatcher (§4.6): what runs once the signon state
//! machine has decided a connection carries a `LOGIN_COOKIE` and is headed
//! into the long-lived dispatch loop rather than a one-shot auth exchange.

use std::sync::Arc;

use oscar_types::ErrorKind;

use crate::capabilities::{AuthService, BuddyListRegistry, ChatSessionManager, CrackedCookie, DepartureNotifier, ServiceKind};
use crate::session::Session;

/// End-of-connection cleanup to run once the dispatch loop for this
/// session has exited, matching the three-way branch in §4.6 step 2.
pub enum Teardown {
    /// A BOS session: broadcast the buddy's departure, drop the buddy-list
    /// entry, leave every chat room, then sign out.
    Bos,
    /// A chat session: sign out of chat only.
    Chat,
    /// Any ancillary service kind: no lifecycle callbacks at all.
    None,
}

/// The result of successfully entering service for a cracked cookie: the
/// session to drive the dispatch loop against, and what to do when that
/// loop exits.
pub struct ServiceEntry {
    pub session: Arc<Session>,
    pub teardown: Teardown,
}

/// Register whatever session the cracked cookie's service kind calls for
/// (§4.6 step 2). Returns the session plus its matching teardown action; the
/// caller drives the dispatch loop and then calls [`run_teardown`].
pub async fn enter_service(
    cookie: &CrackedCookie,
    auth: &dyn AuthService,
    buddy_list: &dyn BuddyListRegistry,
) -> Result<ServiceEntry, ErrorKind> {
    match cookie.service {
        ServiceKind::Bos => {
            let session = auth.register_bos_session(cookie).await?;
            buddy_list.register_buddy_list(&session.ident_screen_name).await?;
            Ok(ServiceEntry {
                session,
                teardown: Teardown::Bos,
            })
        }
        ServiceKind::Chat => {
            let session = auth.register_chat_session(cookie).await?;
            Ok(ServiceEntry {
                session,
                teardown: Teardown::Chat,
            })
        }
        _ => {
            let session = auth.retrieve_bos_session(cookie).await?;
            Ok(ServiceEntry {
                session,
                teardown: Teardown::None,
            })
        }
    }
}

/// Run the end-of-connection cleanup for `teardown` (§4.6 step 2). Idempotent
/// per connection: the dispatch loop calls this exactly once on exit,
/// regardless of which exit path was taken (§9).
pub async fn run_teardown(
    teardown: Teardown,
    session: &Arc<Session>,
    auth: &dyn AuthService,
    buddy_list: &dyn BuddyListRegistry,
    chats: &dyn ChatSessionManager,
    departures: &dyn DepartureNotifier,
) {
    match teardown {
        Teardown::Bos => {
            departures.broadcast_buddy_departed(session).await;
            if let Err(err) = buddy_list.unregister_buddy_list(&session.ident_screen_name).await {
                log::warn!(
                    "failed to unregister buddy list for {}: {err}",
                    session.ident_screen_name
                );
            }
            chats.remove_user_from_all_chats(&session.ident_screen_name).await;
            auth.signout(session).await;
        }
        Teardown::Chat => {
            auth.signout_chat(session).await;
        }
        Teardown::None => {}
    }
}
