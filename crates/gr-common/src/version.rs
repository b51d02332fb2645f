//! ---
//! gr_section: "00-meta"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Build and release metadata reported to clients and the CLI."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use serde::Serialize;

/// Compile-time version metadata captured via `vergen`.
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    /// Workspace semantic version.
    pub semver: String,
    pub build_timestamp: String,
    pub target: String,
    pub profile: String,
}

impl VersionInfo {
    #[must_use]
    pub fn current() -> Self {
        Self {
            semver: env!("CARGO_PKG_VERSION").to_owned(),
            build_timestamp: option_env!("VERGEN_BUILD_TIMESTAMP")
                .unwrap_or("UNKNOWN")
                .to_owned(),
            target: option_env!("VERGEN_CARGO_TARGET_TRIPLE")
                .unwrap_or("UNKNOWN")
                .to_owned(),
            profile: option_env!("VERGEN_CARGO_PROFILE")
                .unwrap_or("UNKNOWN")
                .to_owned(),
        }
    }

    /// `M.m.p` without pre-release or build suffixes, as sent to the browser.
    #[must_use]
    pub fn short(&self) -> String {
        let core = self
            .semver
            .split(['-', '+'])
            .next()
            .unwrap_or(self.semver.as_str());
        let mut parts = core.split('.').map(|part| part.parse::<u64>().unwrap_or(0));
        let major = parts.next().unwrap_or(0);
        let minor = parts.next().unwrap_or(0);
        let patch = parts.next().unwrap_or(0);
        format!("{major}.{minor}.{patch}")
    }

    #[must_use]
    pub fn banner(&self) -> String {
        format!("Ghost Rover v{}", self.short())
    }

    /// Extended string for `--version`.
    #[must_use]
    pub fn extended(&self) -> String {
        format!(
            "{banner}\nBuilt: {built}\nTarget: {target}\nProfile: {profile}",
            banner = self.banner(),
            built = self.build_timestamp,
            target = self.target,
            profile = self.profile
        )
    }
}
