use std::collections::HashSet;

/// Decides who may issue clobbers that reach every slave of a builddir.
pub trait ReleasePolicy: Send + Sync {
    fn may_broadcast(&self, who: &str) -> bool;
}

/// A fixed set of release accounts.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    users: HashSet<String>,
}

impl AllowList {
    pub fn new(users: impl IntoIterator<Item = impl Into<String>>) -> AllowList {
        AllowList {
            users: users.into_iter().map(Into::into).collect(),
        }
    }
}

impl ReleasePolicy for AllowList {
    fn may_broadcast(&self, who: &str) -> bool {
        self.users.contains(who)
    }
}
