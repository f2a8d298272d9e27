/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The in-process session store: sessions keyed by [`SessionId`],
//! partitioned into realms, each realm holding a recursive tree of
//! per-widget state (path_info and query string).  Persistence is a
//! collaborator's business.

pub mod id;

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use rustc_hash::FxHashMap;

pub use id::SessionId;

/// State one widget instance keeps between requests.
#[derive(Debug, Default, Clone)]
pub struct WidgetSession {
    pub path_info: Option<String>,
    pub query_string: Option<String>,
    children: FxHashMap<String, WidgetSession>,
}

impl WidgetSession {
    pub fn get_child(&mut self, id: &str, create: bool) -> Option<&mut WidgetSession> {
        if create {
            Some(self.children.entry(id.to_string()).or_default())
        } else {
            self.children.get_mut(id)
        }
    }
}

/// Session state partitioned by authentication realm.
#[derive(Debug, Default)]
pub struct RealmSession {
    widgets: FxHashMap<String, WidgetSession>,
}

impl RealmSession {
    pub fn get_widget(&mut self, id: &str, create: bool) -> Option<&mut WidgetSession> {
        if create {
            Some(self.widgets.entry(id.to_string()).or_default())
        } else {
            self.widgets.get_mut(id)
        }
    }
}

pub struct Session {
    pub id: SessionId,
    realms: FxHashMap<String, RealmSession>,
}

impl Session {
    pub fn get_realm(&mut self, realm: &str, create: bool) -> Option<&mut RealmSession> {
        if create {
            Some(self.realms.entry(realm.to_string()).or_default())
        } else {
            self.realms.get_mut(realm)
        }
    }
}

/// Owns all sessions of this process and generates their ids.
pub struct SessionManager {
    sessions: RefCell<FxHashMap<SessionId, Rc<RefCell<Session>>>>,
    prng: RefCell<SmallRng>,
    cluster: Option<(u32, u32)>,
}

impl SessionManager {
    /// `cluster` is `(size, node)` when session ids must encode the
    /// cluster node for sticky load balancing.
    pub fn new(cluster: Option<(u32, u32)>) -> Rc<SessionManager> {
        Rc::new(SessionManager {
            sessions: RefCell::new(FxHashMap::default()),
            prng: RefCell::new(SmallRng::from_os_rng()),
            cluster,
        })
    }

    pub fn generate_id(&self) -> SessionId {
        let mut id = SessionId::default();
        id.generate(&mut *self.prng.borrow_mut());
        if let Some((size, node)) = self.cluster {
            id.set_cluster_node(size, node);
        }
        id
    }

    pub fn create_session(&self) -> Rc<RefCell<Session>> {
        let id = self.generate_id();
        let session = Rc::new(RefCell::new(Session {
            id,
            realms: FxHashMap::default(),
        }));
        self.sessions.borrow_mut().insert(id, Rc::clone(&session));
        session
    }

    pub fn get(&self, id: SessionId) -> Option<Rc<RefCell<Session>>> {
        self.sessions.borrow().get(&id).cloned()
    }

    pub fn discard(&self, id: SessionId) {
        self.sessions.borrow_mut().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.sessions.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.borrow().is_empty()
    }
}
