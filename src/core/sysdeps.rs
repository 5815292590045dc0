//! FR-013: System-dependency advisor — render privileged steps as instructions.
//!
//! Output is text only. Steps are bucketed by category and always rendered
//! packages, configuration, manual, then verification, whatever their
//! order in the recipe.

use super::error::Error;
use super::types::{Platform, ResolvedStep};
use crate::actions::{system, Category};
use std::fmt::Write as _;

/// Privileged step descriptions, bucketed by category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instructions {
    pub packages: Vec<String>,
    pub configuration: Vec<String>,
    pub manual: Vec<String>,
    pub verification: Vec<String>,
}

impl Instructions {
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty() && self.configuration.is_empty() && self.manual.is_empty() && self.verification.is_empty()
    }

    /// Everything except verification needs the user to act.
    pub fn needs_action(&self) -> bool {
        !(self.packages.is_empty() && self.configuration.is_empty() && self.manual.is_empty())
    }
}

/// Describe and bucket the privileged steps. Non-privileged steps are ignored.
pub fn collect<'a>(steps: impl IntoIterator<Item = &'a ResolvedStep>) -> Result<Instructions, Error> {
    let mut out = Instructions::default();
    for step in steps {
        let Some(category) = step.action.category() else {
            continue;
        };
        let Some(text) = system::describe(step.action, &step.params)? else {
            continue;
        };
        let bucket = match category {
            Category::Packages => &mut out.packages,
            Category::Configuration => &mut out.configuration,
            Category::Manual => &mut out.manual,
            Category::Verification => &mut out.verification,
        };
        bucket.push(text);
    }
    Ok(out)
}

/// Human name of a target for instruction headers.
pub fn target_display_name(target: &Platform) -> String {
    if target.os == "darwin" {
        return "macOS".to_string();
    }
    match target.linux_family.as_deref() {
        Some("debian") => "Ubuntu/Debian".to_string(),
        Some("rhel") => "Fedora/RHEL/CentOS".to_string(),
        Some("arch") => "Arch Linux".to_string(),
        Some("alpine") => "Alpine Linux".to_string(),
        Some("suse") => "openSUSE/SLES".to_string(),
        Some(other) => other.to_string(),
        None => target.os.clone(),
    }
}

/// Render numbered instructions. Empty input renders nothing.
pub fn render(target: &Platform, instructions: &Instructions) -> String {
    if instructions.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    let _ = writeln!(
        out,
        "This recipe requires system dependencies for {}:\n",
        target_display_name(target)
    );
    let numbered = instructions
        .packages
        .iter()
        .chain(&instructions.configuration)
        .chain(&instructions.manual);
    for (i, line) in numbered.enumerate() {
        let _ = writeln!(out, "  {}. {}", i + 1, line);
    }
    if !instructions.verification.is_empty() {
        let _ = writeln!(out, "\nAfter installation, verify with:");
        for line in &instructions.verification {
            let _ = writeln!(out, "  {}", line);
        }
    }
    let _ = writeln!(out, "\nAfter completing these steps, run the install command again.");
    out
}
