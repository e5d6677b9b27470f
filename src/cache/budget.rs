use num_format::{Locale, ToFormattedString};
use regex::Regex;
use std::sync::LazyLock;

use crate::error::{JukeboxError, Result};

static SIZE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\s*(b|kb|mb|gb|tb)?$").expect("size regex is valid")
});

const KIB: u64 = 1024;

/// Convierte un tamaño como `5GB`, `500mb` o `1048576` a bytes.
///
/// Units are binary (1 KB = 1024 bytes) and case-insensitive. A bare number
/// is taken as bytes. Anything else, including negative values and sizes
/// that overflow `u64`, is rejected with [`JukeboxError::InvalidBudget`].
pub fn parse_size(input: &str) -> Result<u64> {
    let normalized = input.trim().to_lowercase();
    let captures = SIZE_REGEX
        .captures(&normalized)
        .ok_or_else(|| JukeboxError::InvalidBudget(input.to_string()))?;

    let value: u64 = captures[1]
        .parse()
        .map_err(|_| JukeboxError::InvalidBudget(input.to_string()))?;

    let multiplier = match captures.get(2).map(|m| m.as_str()) {
        None | Some("b") => 1,
        Some("kb") => KIB,
        Some("mb") => KIB.pow(2),
        Some("gb") => KIB.pow(3),
        Some("tb") => KIB.pow(4),
        Some(_) => return Err(JukeboxError::InvalidBudget(input.to_string())),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| JukeboxError::InvalidBudget(input.to_string()))
}

/// Formatea bytes en la unidad binaria más grande que deje un valor >= 1.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < KIB {
        return format!("{} B", bytes.to_formatted_string(&Locale::en));
    }

    let mut value = bytes as f64;
    let mut unit = UNITS[0];
    for candidate in UNITS {
        value /= KIB as f64;
        unit = candidate;
        if value < KIB as f64 {
            break;
        }
    }
    format!("{value:.2} {unit}")
}

/// Resultado de una pasada de `enforce_budget`.
///
/// When `unenforceable` is set, every entry that could be evicted was
/// evicted and usage is still above budget: the remaining bytes belong to
/// the item being played, to the entry just inserted, or to files outside the
/// index. This is a warning for the caller, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetReport {
    pub used_bytes: u64,
    pub budget_bytes: u64,
    /// Ids evicted during this pass, oldest first
    pub evicted: Vec<String>,
    pub unenforceable: bool,
}

impl BudgetReport {
    pub fn within_budget(&self) -> bool {
        self.used_bytes <= self.budget_bytes
    }
}

impl std::fmt::Display for BudgetReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} de {} usados",
            format_bytes(self.used_bytes),
            format_bytes(self.budget_bytes)
        )?;
        if !self.evicted.is_empty() {
            write!(f, ", {} canciones eliminadas", self.evicted.len())?;
        }
        if self.unenforceable {
            write!(f, " (⚠️ no se pudo bajar del límite: la canción en uso no se elimina)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("5GB").unwrap(), 5 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("500mb").unwrap(), 500 * 1024 * 1024);
        assert_eq!(parse_size(" 64 KB ").unwrap(), 64 * 1024);
        assert_eq!(parse_size("1000").unwrap(), 1000);
        assert_eq!(parse_size("0gb").unwrap(), 0);
    }

    #[test]
    fn test_parse_size_rejects_malformed_input() {
        for input in ["", "abc", "-5GB", "5 GiB", "GB", "1.5GB", "99999999999999999999"] {
            assert!(
                matches!(parse_size(input), Err(JukeboxError::InvalidBudget(_))),
                "{input:?} should be rejected"
            );
        }
        assert!(matches!(
            parse_size("18446744073709551615tb"),
            Err(JukeboxError::InvalidBudget(_))
        ));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.00 GB");
    }
}
