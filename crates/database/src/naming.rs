//! Naming convention for schema objects.
//!
//! Constraint and index names are derived from table and column names with
//! fixed templates, so the same model always produces the same identifiers
//! and schema diffs stay reproducible:
//!
//! | Kind        | Template                                  |
//! |-------------|-------------------------------------------|
//! | index       | `{column_0_label}_idx`                    |
//! | unique      | `{table_name}_{column_0_name}_key`        |
//! | check       | `{table_name}_{constraint_name}_check`    |
//! | foreign key | `{table_name}_{column_0_name}_fkey`       |
//! | primary key | `{table_name}_pkey`                       |
//!
//! `column_0_label` is `{table_name}_{column_0_name}`.

use crate::error::DbError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    Index,
    Unique,
    Check,
    ForeignKey,
    PrimaryKey,
}

/// The full convention table, in declaration order.
pub const NAMING_CONVENTION: [(ConstraintKind, &str); 5] = [
    (ConstraintKind::Index, "{column_0_label}_idx"),
    (ConstraintKind::Unique, "{table_name}_{column_0_name}_key"),
    (ConstraintKind::Check, "{table_name}_{constraint_name}_check"),
    (ConstraintKind::ForeignKey, "{table_name}_{column_0_name}_fkey"),
    (ConstraintKind::PrimaryKey, "{table_name}_pkey"),
];

impl ConstraintKind {
    /// Short key used by migration tooling (`ix`, `uq`, ...).
    pub fn key(self) -> &'static str {
        match self {
            ConstraintKind::Index => "ix",
            ConstraintKind::Unique => "uq",
            ConstraintKind::Check => "ck",
            ConstraintKind::ForeignKey => "fk",
            ConstraintKind::PrimaryKey => "pk",
        }
    }

    pub fn template(self) -> &'static str {
        NAMING_CONVENTION
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, template)| *template)
            .unwrap_or("{table_name}")
    }

    /// Whether the template needs a first column (or, for checks, the
    /// constraint name) in addition to the table.
    fn needs_first_part(self) -> bool {
        !matches!(self, ConstraintKind::PrimaryKey)
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Generates the identifier for a schema object.
///
/// `parts` are the column names the object covers; only the first is used by
/// the templates. For [`ConstraintKind::Check`] the first part is the
/// constraint's own name instead. Primary keys need no parts.
pub fn name_for(kind: ConstraintKind, table: &str, parts: &[&str]) -> Result<String, DbError> {
    if table.trim().is_empty() {
        return Err(DbError::InvalidIdentifier(format!(
            "{kind} name requested for an empty table name"
        )));
    }
    if let Some(position) = parts.iter().position(|part| part.trim().is_empty()) {
        return Err(DbError::InvalidIdentifier(format!(
            "{kind} name for table '{table}' has an empty column at position {position}"
        )));
    }

    let first = parts.first().copied();
    if kind.needs_first_part() && first.is_none() {
        let what = if kind == ConstraintKind::Check {
            "a constraint name"
        } else {
            "at least one column"
        };
        return Err(DbError::InvalidIdentifier(format!(
            "{kind} name for table '{table}' requires {what}"
        )));
    }

    let first = first.unwrap_or_default();
    let name = kind
        .template()
        .replace("{column_0_label}", &format!("{table}_{first}"))
        .replace("{column_0_name}", first)
        .replace("{constraint_name}", first)
        .replace("{table_name}", table);

    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_follows_its_template() {
        assert_eq!(
            name_for(ConstraintKind::Index, "resume", &["user_id"]).unwrap(),
            "resume_user_id_idx"
        );
        assert_eq!(
            name_for(ConstraintKind::Unique, "user", &["email"]).unwrap(),
            "user_email_key"
        );
        assert_eq!(
            name_for(ConstraintKind::Check, "job", &["positive_salary"]).unwrap(),
            "job_positive_salary_check"
        );
        assert_eq!(
            name_for(ConstraintKind::ForeignKey, "resume", &["user_id"]).unwrap(),
            "resume_user_id_fkey"
        );
        assert_eq!(
            name_for(ConstraintKind::PrimaryKey, "resume", &[]).unwrap(),
            "resume_pkey"
        );
    }

    #[test]
    fn only_the_first_column_is_used() {
        assert_eq!(
            name_for(ConstraintKind::Index, "post_like", &["post_id", "user_id"]).unwrap(),
            "post_like_post_id_idx"
        );
        assert_eq!(
            name_for(ConstraintKind::PrimaryKey, "post_like", &["post_id", "user_id"]).unwrap(),
            "post_like_pkey"
        );
    }

    #[test]
    fn names_are_deterministic() {
        let tables = ["user", "payment_account", "a"];
        let columns = ["id", "created_at", "x"];
        let kinds = NAMING_CONVENTION.map(|(kind, _)| kind);

        for kind in kinds {
            for table in tables {
                for column in columns {
                    let first = name_for(kind, table, &[column]).unwrap();
                    let second = name_for(kind, table, &[column]).unwrap();
                    assert_eq!(first, second);
                }
            }
        }
    }

    #[test]
    fn empty_inputs_are_rejected() {
        assert!(matches!(
            name_for(ConstraintKind::Index, "", &["id"]),
            Err(DbError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            name_for(ConstraintKind::Unique, "user", &[" "]),
            Err(DbError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            name_for(ConstraintKind::ForeignKey, "user", &[]),
            Err(DbError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            name_for(ConstraintKind::Check, "user", &[]),
            Err(DbError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            name_for(ConstraintKind::PrimaryKey, "  ", &[]),
            Err(DbError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn keys_match_the_migration_tooling() {
        let keys: Vec<_> = NAMING_CONVENTION.iter().map(|(kind, _)| kind.key()).collect();
        assert_eq!(keys, ["ix", "uq", "ck", "fk", "pk"]);
    }
}
