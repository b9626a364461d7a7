//! draftctl: inspect and edit a project's drafts from the command line.

use clap::{Parser, Subcommand};
use patentdraft_cache::{Freshness, InMemoryCacheStore};
use patentdraft_core::{DraftResult, ProjectId, SectionType, SectionUpdate, TenantId};
use patentdraft_sync::{
    init_tracing, DraftReconciler, HttpDraftGateway, ReconcilerOptions, RetryPolicy,
    RetryingGateway, SyncConfig, TelemetryConfig,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "draftctl")]
#[command(about = "Inspect and edit patent application drafts")]
struct Cli {
    /// Config file (defaults to $PATENTDRAFT_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the composed draft
    Show {
        project_id: ProjectId,
    },
    /// Print whether the project has drafts
    Exists {
        project_id: ProjectId,
    },
    /// Replace one section
    Set {
        project_id: ProjectId,
        /// Section name, e.g. CLAIMS or detailed-description
        section: SectionType,
        /// New section text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Restore a saved version
    Restore {
        project_id: ProjectId,
        version_id: String,
    },
}

#[tokio::main]
async fn main() -> DraftResult<()> {
    let cli = Cli::parse();
    init_tracing(&TelemetryConfig::from_env())?;
    let config = SyncConfig::load(cli.config.as_deref())?;

    let gateway = RetryingGateway::new(
        HttpDraftGateway::new(&config)?,
        RetryPolicy::from(&config.retry),
    );
    let store = InMemoryCacheStore::new(config.cache.event_capacity);
    let options = ReconcilerOptions::from(&config.cache);
    let reconciler = DraftReconciler::new(gateway, store, options);
    let tenant_id = TenantId::new(config.tenant_id);

    match cli.command {
        Command::Show { project_id } => {
            let read = reconciler
                .content(tenant_id, project_id, false, Freshness::consistent())
                .await?;
            let composed = read.into_value();
            for document in &composed.documents {
                println!(
                    "# {} ({}, updated {})",
                    document.section_type, document.id, document.updated_at
                );
            }
            if composed.has_content {
                println!("\n{}", composed.content);
            } else {
                println!("(no content)");
            }
        }
        Command::Exists { project_id } => {
            let exists = reconciler.has_documents(tenant_id, project_id).await?;
            println!("{}", exists.value());
        }
        Command::Set {
            project_id,
            section,
            text,
        } => {
            let update = SectionUpdate::new(section, text.join(" "));
            let saved = reconciler
                .update_section(tenant_id, project_id, update)
                .await?;
            println!("saved {} as {}", saved.section_type, saved.id);
        }
        Command::Restore {
            project_id,
            version_id,
        } => {
            let mut overrides = reconciler.subscribe_overrides();
            let outcome = reconciler
                .restore_version(tenant_id, project_id, &version_id)
                .await?;
            println!(
                "restored {} ({} documents, resynced: {})",
                outcome.version_name, outcome.document_count, outcome.resynced
            );
            let wait = reconciler.options().override_broadcast_delay + Duration::from_secs(1);
            if let Ok(Ok(event)) = tokio::time::timeout(wait, overrides.recv()).await {
                println!("override broadcast for {}", event.project_id);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const PROJECT: &str = "0190f3b4-7c4e-7a1e-9a43-2f1d7c9e8b10";

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_config_flag_is_accepted_after_the_subcommand() {
        let cli = Cli::try_parse_from(["draftctl", "show", PROJECT, "--config", "draft.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("draft.toml")));
        assert!(matches!(cli.command, Command::Show { .. }));

        let cli = Cli::try_parse_from(["draftctl", "exists", PROJECT]).unwrap();
        assert_eq!(cli.config, None);
    }

    #[test]
    fn test_set_joins_text_and_parses_section() {
        let cli = Cli::try_parse_from([
            "draftctl",
            "--config",
            "draft.toml",
            "set",
            PROJECT,
            "detailed-description",
            "A",
            "widget.",
        ])
        .unwrap();
        match cli.command {
            Command::Set {
                project_id,
                section,
                text,
            } => {
                assert_eq!(project_id.to_string(), PROJECT);
                assert_eq!(section, SectionType::DetailedDescription);
                assert_eq!(text.join(" "), "A widget.");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_bad_arguments_are_rejected() {
        assert!(Cli::try_parse_from(["draftctl", "show", "not-a-uuid"]).is_err());
        assert!(Cli::try_parse_from(["draftctl", "set", PROJECT, "NOT_A_SECTION", "x"]).is_err());
        assert!(Cli::try_parse_from(["draftctl", "set", PROJECT, "CLAIMS"]).is_err());
        assert!(Cli::try_parse_from(["draftctl", "restore", PROJECT]).is_err());
        assert!(Cli::try_parse_from(["draftctl", "publish", PROJECT]).is_err());
    }
}
