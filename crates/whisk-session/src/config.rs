//! `init` configuration.

use std::collections::BTreeMap;

use whisk_auth::WsToken;
use whisk_settings::{ClientSettings, TransportSettings};

use crate::routes::{RouteGroup, RouteSpec};

/// Per-tier route overrides merged into the registry at `init`.
///
/// Each entry replaces the handler and/or callback it carries and leaves
/// the other part of the existing registration alone.
#[derive(Clone, Debug, Default)]
pub struct RouteOverrides {
    /// `base` tier overrides.
    pub base: BTreeMap<String, RouteSpec>,
    /// `protocol` tier overrides.
    pub protocol: BTreeMap<String, RouteSpec>,
    /// `application` tier routes.
    pub application: BTreeMap<String, RouteSpec>,
}

impl RouteOverrides {
    /// Overrides for one tier.
    pub fn group(&self, group: RouteGroup) -> &BTreeMap<String, RouteSpec> {
        match group {
            RouteGroup::Base => &self.base,
            RouteGroup::Protocol => &self.protocol,
            RouteGroup::Application => &self.application,
        }
    }

    /// Mutable overrides for one tier.
    pub fn group_mut(&mut self, group: RouteGroup) -> &mut BTreeMap<String, RouteSpec> {
        match group {
            RouteGroup::Base => &mut self.base,
            RouteGroup::Protocol => &mut self.protocol,
            RouteGroup::Application => &mut self.application,
        }
    }

    /// Add or replace an override. Returns the one it replaced.
    pub fn insert(
        &mut self,
        group: RouteGroup,
        route: impl Into<String>,
        spec: RouteSpec,
    ) -> Option<RouteSpec> {
        self.group_mut(group).insert(route.into(), spec)
    }

    /// Like [`RouteOverrides::insert`], with the group given by name.
    pub fn insert_named(
        &mut self,
        group: &str,
        route: impl Into<String>,
        spec: RouteSpec,
    ) -> crate::Result<Option<RouteSpec>> {
        let group: RouteGroup = group.parse()?;
        Ok(self.insert(group, route, spec))
    }

    /// Whether no tier has overrides.
    pub fn is_empty(&self) -> bool {
        self.base.is_empty() && self.protocol.is_empty() && self.application.is_empty()
    }

    pub(crate) fn into_groups(self) -> [(RouteGroup, BTreeMap<String, RouteSpec>); 3] {
        [
            (RouteGroup::Base, self.base),
            (RouteGroup::Protocol, self.protocol),
            (RouteGroup::Application, self.application),
        ]
    }
}

/// Options for [`Session::init`](crate::Session::init).
#[derive(Clone, Debug, Default)]
pub struct SessionConfig {
    /// Where to connect. Only `port` is commonly changed.
    pub transport: TransportSettings,
    /// A token to reuse instead of renewing on the first connect.
    pub token: Option<WsToken>,
    /// Route overrides per tier.
    pub routes: RouteOverrides,
}

impl SessionConfig {
    /// Transport endpoint taken from loaded client settings.
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            transport: settings.transport.clone(),
            ..Self::default()
        }
    }

    /// Connect to `port` instead.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.transport.port = port;
        self
    }

    /// Reuse `token`.
    #[must_use]
    pub fn with_token(mut self, token: WsToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Add a route override.
    #[must_use]
    pub fn with_route(
        mut self,
        group: RouteGroup,
        route: impl Into<String>,
        spec: RouteSpec,
    ) -> Self {
        let _ = self.routes.insert(group, route, spec);
        self
    }
}
