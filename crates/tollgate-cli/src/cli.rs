use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tollgate_core::tuple::{EntityRef, SubjectRef};

#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about = "Evaluate relationship-based permissions")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Where the schema and relationships of a one-shot evaluation come from.
#[derive(Debug, Args)]
pub struct DataArgs {
    #[arg(long)]
    pub schema: PathBuf,

    /// One `entity#relation@subject` tuple per line.
    #[arg(long)]
    pub relationships: Option<PathBuf>,

    #[arg(long, default_value = "default")]
    pub tenant: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Decide whether a subject holds a permission or relation on an entity.
    Check {
        #[command(flatten)]
        data: DataArgs,
        #[arg(long)]
        entity: EntityRef,
        #[arg(long)]
        permission: String,
        #[arg(long)]
        subject: SubjectRef,
        #[arg(long)]
        depth: Option<u32>,
    },
    /// List every relation and permission of an entity the subject holds.
    SubjectPermission {
        #[command(flatten)]
        data: DataArgs,
        #[arg(long)]
        entity: EntityRef,
        #[arg(long)]
        subject: SubjectRef,
        #[arg(long)]
        only_permission: bool,
        #[arg(long)]
        depth: Option<u32>,
    },
    ValidateSchema {
        #[arg(long)]
        schema: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn cli_parses_check_subcommand() {
        let cli = Cli::parse_from([
            "tollgate",
            "check",
            "--schema",
            "drive.perm",
            "--relationships",
            "drive.tuples",
            "--entity",
            "doc:1",
            "--permission",
            "read",
            "--subject",
            "user:1",
        ]);

        match cli.command {
            Command::Check {
                data,
                entity,
                permission,
                subject,
                depth,
            } => {
                assert_eq!(data.schema, PathBuf::from("drive.perm"));
                assert_eq!(data.relationships, Some(PathBuf::from("drive.tuples")));
                assert_eq!(data.tenant, "default");
                assert_eq!(entity, EntityRef::new("doc", "1"));
                assert_eq!(permission, "read");
                assert_eq!(subject, SubjectRef::direct("user", "1"));
                assert_eq!(depth, None);
            }
            other => panic!("expected check, got: {other:?}"),
        }
    }

    #[test]
    fn cli_parses_userset_subject_and_depth() {
        let cli = Cli::parse_from([
            "tollgate",
            "check",
            "--schema",
            "drive.perm",
            "--entity",
            "doc:1",
            "--permission",
            "owner",
            "--subject",
            "organization:1#admin",
            "--depth",
            "5",
        ]);

        assert!(matches!(
            cli.command,
            Command::Check { subject, depth: Some(5), .. }
                if subject == SubjectRef::userset("organization", "1", "admin")
        ));
    }

    #[test]
    fn cli_parses_subject_permission_subcommand() {
        let cli = Cli::parse_from([
            "tollgate",
            "subject-permission",
            "--schema",
            "drive.perm",
            "--tenant",
            "acme",
            "--entity",
            "doc:1",
            "--subject",
            "user:1",
            "--only-permission",
        ]);

        assert!(matches!(
            cli.command,
            Command::SubjectPermission { data, only_permission: true, depth: None, .. }
                if data.tenant == "acme" && data.relationships.is_none()
        ));
    }

    #[test]
    fn cli_parses_validate_schema() {
        let cli = Cli::parse_from(["tollgate", "validate-schema", "--schema", "drive.perm"]);

        assert!(matches!(
            cli.command,
            Command::ValidateSchema { schema } if schema == PathBuf::from("drive.perm")
        ));
    }

    #[test]
    fn cli_config_flag_works_after_subcommand() {
        let cli = Cli::parse_from([
            "tollgate",
            "validate-schema",
            "--schema",
            "drive.perm",
            "--config",
            "/etc/tollgate.toml",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/tollgate.toml")));
    }

    #[test]
    fn cli_rejects_malformed_entity() {
        let result = Cli::try_parse_from([
            "tollgate",
            "check",
            "--schema",
            "drive.perm",
            "--entity",
            "doc",
            "--permission",
            "read",
            "--subject",
            "user:1",
        ]);

        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn cli_requires_a_subcommand() {
        let result = Cli::try_parse_from(["tollgate"]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_version_flag() {
        let err = Cli::try_parse_from(["tollgate", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
