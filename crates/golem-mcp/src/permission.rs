//! Permission guard: server allowlist plus tool rule evaluation (§4.5).
//!
//! Grounded on the pattern-matching shape of the teacher's
//! `astrid-approval::allowance::pattern` module, generalized from
//! `globset` to the regex-based glob semantics spec.md mandates literally:
//! `*` becomes "any run of characters", every other regex metacharacter is
//! escaped.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use regex::Regex;

/// Scopes a permission rule can gate (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Reading data.
    Read,
    /// Writing or mutating data.
    Write,
    /// Executing code or commands.
    Execute,
    /// Performing network access.
    Network,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Execute => "execute",
            Self::Network => "network",
        };
        write!(f, "{s}")
    }
}

/// A single permission clause: a tool-name pattern, an allow/deny bit, and
/// optional required scopes (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRule {
    /// Literal tool name, a glob containing `*`, or the catch-all `"*"`.
    pub tool: String,
    /// Whether a match permits (`true`) or denies (`false`) the call.
    pub allow: bool,
    /// Scopes granted when this rule matches and a query names required
    /// scopes.
    #[serde(default)]
    pub scopes: Vec<Scope>,
}

impl PermissionRule {
    /// Build an allow rule for an exact or glob tool pattern.
    #[must_use]
    pub fn allow(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            allow: true,
            scopes: Vec::new(),
        }
    }

    /// Build a deny rule for an exact or glob tool pattern.
    #[must_use]
    pub fn deny(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            allow: false,
            scopes: Vec::new(),
        }
    }

    /// Attach required scopes, builder-style.
    #[must_use]
    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = Scope>) -> Self {
        self.scopes = scopes.into_iter().collect();
        self
    }

    fn is_glob(&self) -> bool {
        self.tool != "*" && self.tool.contains('*')
    }

    fn glob_regex(&self) -> Regex {
        let mut pattern = String::from("^");
        for part in self.tool.split('*') {
            pattern.push_str(&regex::escape(part));
            pattern.push_str(".*");
        }
        // Trailing ".*" added one time too many; trim it back off.
        pattern.truncate(pattern.len() - 2);
        pattern.push('$');
        Regex::new(&pattern).unwrap_or_else(|_| Regex::new("$^").expect("empty-match regex"))
    }
}

/// Outcome of a permission check, carrying a reason when denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The call (or server) is permitted.
    Allow,
    /// The call (or server) is denied, with a human-readable reason.
    Deny(String),
}

impl Decision {
    /// Whether this decision permits the call.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Evaluates server allowlisting and tool-call permission rules.
#[derive(Debug, Clone, Default)]
pub struct PermissionGuard {
    server_allowlist: Option<HashSet<String>>,
    rules: Vec<PermissionRule>,
}

impl PermissionGuard {
    /// A guard with no server restriction and no tool rules (permits
    /// everything).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to only the given server names. Passing `None` removes any
    /// restriction.
    #[must_use]
    pub fn with_server_allowlist(mut self, names: Option<impl IntoIterator<Item = impl Into<String>>>) -> Self {
        self.server_allowlist = names.map(|n| n.into_iter().map(Into::into).collect());
        self
    }

    /// Set the tool permission rules, evaluated in the given order.
    #[must_use]
    pub fn with_rules(mut self, rules: Vec<PermissionRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Check whether a server name is allowed (§4.5).
    #[must_use]
    pub fn is_server_allowed(&self, name: &str) -> Decision {
        match &self.server_allowlist {
            None => Decision::Allow,
            Some(allowed) if allowed.contains(name) => Decision::Allow,
            Some(_) => Decision::Deny(format!("server not in allowlist: {name}")),
        }
    }

    /// Check whether a tool call is permitted, applying the exact → glob →
    /// catch-all precedence and scope checking described in §4.5.
    #[must_use]
    pub fn check_tool(&self, tool_name: &str, required_scopes: &[Scope]) -> Decision {
        if self.rules.is_empty() {
            return Decision::Allow;
        }

        let matched = self
            .rules
            .iter()
            .find(|r| r.tool == tool_name)
            .or_else(|| {
                self.rules
                    .iter()
                    .find(|r| r.is_glob() && r.glob_regex().is_match(tool_name))
            })
            .or_else(|| self.rules.iter().find(|r| r.tool == "*"));

        let Some(rule) = matched else {
            return Decision::Deny("no rule matched".to_string());
        };

        if !rule.allow {
            return Decision::Deny("explicitly denied".to_string());
        }

        if !required_scopes.is_empty() && !rule.scopes.is_empty() {
            let missing: Vec<String> = required_scopes
                .iter()
                .filter(|s| !rule.scopes.contains(s))
                .map(ToString::to_string)
                .collect();
            if !missing.is_empty() {
                return Decision::Deny(format!("missing scopes: {}", missing.join(", ")));
            }
        }

        Decision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_rule_set_permits_everything() {
        let guard = PermissionGuard::new();
        assert!(guard.check_tool("anything", &[]).is_allowed());
    }

    #[test]
    fn exact_match_takes_precedence_over_glob() {
        let guard = PermissionGuard::new().with_rules(vec![
            PermissionRule::deny("file_*"),
            PermissionRule::allow("file_read"),
        ]);
        assert!(guard.check_tool("file_read", &[]).is_allowed());
        assert!(!guard.check_tool("file_write", &[]).is_allowed());
    }

    #[test]
    fn glob_rules_match_wildcard_patterns() {
        let guard = PermissionGuard::new().with_rules(vec![
            PermissionRule::allow("file_*").with_scopes([Scope::Read, Scope::Write]),
            PermissionRule::deny("exec_*"),
        ]);
        assert!(guard.check_tool("file_read", &[]).is_allowed());
        assert!(!guard.check_tool("exec_command", &[]).is_allowed());
        assert!(guard
            .check_tool("file_read", &[Scope::Write])
            .is_allowed());
        let denied = guard.check_tool("file_read", &[Scope::Network]);
        assert_eq!(
            denied,
            Decision::Deny("missing scopes: network".to_string())
        );
    }

    #[test]
    fn catch_all_rule_applies_when_nothing_else_matches() {
        let guard = PermissionGuard::new().with_rules(vec![PermissionRule::deny("*")]);
        assert!(!guard.check_tool("whatever", &[]).is_allowed());
    }

    #[test]
    fn no_matching_rule_denies_by_default() {
        let guard = PermissionGuard::new().with_rules(vec![PermissionRule::allow("only_this")]);
        let decision = guard.check_tool("something_else", &[]);
        assert_eq!(decision, Decision::Deny("no rule matched".to_string()));
    }

    #[test]
    fn null_allowlist_permits_every_server() {
        let guard = PermissionGuard::new();
        assert!(guard.is_server_allowed("anything").is_allowed());
    }

    #[test]
    fn concrete_allowlist_denies_unlisted_servers() {
        let guard = PermissionGuard::new().with_server_allowlist(Some(["srv1"]));
        assert!(guard.is_server_allowed("srv1").is_allowed());
        assert!(!guard.is_server_allowed("srv2").is_allowed());
    }
}
