use cronohub_core::contract::{
    ArchiveItem, ArchiveReport, FetchReport, ItemFailure, MockSourcePlugin, MockTargetPlugin,
    PluginContext, PluginRole, SourcePlugin, TargetPlugin,
};
use cronohub_core::error::{PluginError, RunError};
use cronohub_core::orchestrator::{run_resolved, Orchestrator, RunState};
use cronohub_core::registry::{
    PluginOrigin, PluginRegistry, Resolved, ResolvedSource, ResolvedTarget,
};
use tempfile::tempdir;

fn resolved_source(name: &str, plugin: MockSourcePlugin) -> ResolvedSource {
    let plugin: Box<dyn SourcePlugin> = Box::new(plugin);
    Resolved::new(PluginRole::Source, name, PluginOrigin::Bundled, plugin)
}

fn resolved_target(name: &str, plugin: MockTargetPlugin) -> ResolvedTarget {
    let plugin: Box<dyn TargetPlugin> = Box::new(plugin);
    Resolved::new(PluginRole::Target, name, PluginOrigin::Bundled, plugin)
}

fn items(names: &[&str]) -> Vec<ArchiveItem> {
    names
        .iter()
        .map(|n| ArchiveItem::new(*n, format!("./target/{n}_20240101-000000.zip")))
        .collect()
}

/// A target that archives whatever it is given.
fn accepting_target() -> MockTargetPlugin {
    let mut target = MockTargetPlugin::new();
    target.expect_validate().times(1).returning(|| true);
    target.expect_archive().times(1).returning(|items| {
        Ok(ArchiveReport {
            archived: items,
            failures: Vec::new(),
        })
    });
    target
}

#[tokio::test]
async fn happy_path_visits_every_state() {
    let mut source = MockSourcePlugin::new();
    source.expect_validate().times(1).returning(|| true);
    source
        .expect_fetch()
        .times(1)
        .returning(|| Ok(FetchReport::complete(items(&["alpha", "beta"]))));

    let report = run_resolved(
        &resolved_source("github", source),
        &resolved_target("no_op", accepting_target()),
    )
    .await
    .unwrap();

    assert_eq!(report.fetched, 2);
    assert_eq!(report.archived, 2);
    assert!(report.is_complete_success());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(
        report.states,
        vec![
            RunState::Init,
            RunState::SourceResolved,
            RunState::TargetResolved,
            RunState::SourceValidated,
            RunState::TargetValidated,
            RunState::Fetched,
            RunState::Archived,
            RunState::Done,
        ]
    );
}

#[tokio::test]
async fn invalid_source_stops_before_the_target_is_touched() {
    let mut source = MockSourcePlugin::new();
    source.expect_validate().times(1).returning(|| false);
    source.expect_fetch().never();

    let mut target = MockTargetPlugin::new();
    target.expect_validate().never();
    target.expect_archive().never();

    let err = run_resolved(
        &resolved_source("github", source),
        &resolved_target("scp", target),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        RunError::ValidationFailed {
            role: PluginRole::Source,
            ..
        }
    ));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(err.code(), "validation_failed");
}

#[tokio::test]
async fn invalid_target_stops_before_fetching() {
    let mut source = MockSourcePlugin::new();
    source.expect_validate().times(1).returning(|| true);
    source.expect_fetch().never();

    let mut target = MockTargetPlugin::new();
    target.expect_validate().times(1).returning(|| false);
    target.expect_archive().never();

    let err = run_resolved(
        &resolved_source("github", source),
        &resolved_target("s3", target),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        RunError::ValidationFailed {
            role: PluginRole::Target,
            ref name,
        } if name == "s3"
    ));
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn partial_fetch_failures_still_archive_the_rest() {
    let mut source = MockSourcePlugin::new();
    source.expect_validate().returning(|| true);
    source.expect_fetch().returning(|| {
        Ok(FetchReport {
            items: items(&["alpha", "gamma"]),
            failures: vec![ItemFailure::retrieval("beta", "server answered HTTP 404")],
        })
    });

    let mut target = MockTargetPlugin::new();
    target.expect_validate().returning(|| true);
    target
        .expect_archive()
        .withf(|items| items.len() == 2 && items.iter().all(|i| i.name != "beta"))
        .times(1)
        .returning(|items| {
            Ok(ArchiveReport {
                archived: items,
                failures: Vec::new(),
            })
        });

    let report = run_resolved(
        &resolved_source("github", source),
        &resolved_target("scp", target),
    )
    .await
    .unwrap();

    assert_eq!(report.fetched, 2);
    assert_eq!(report.archived, 2);
    assert_eq!(report.fetch_failures.len(), 1);
    assert_eq!(report.fetch_failures[0].name, "beta");
    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.states.last(), Some(&RunState::Done));
}

#[tokio::test]
async fn archive_failures_are_reported_per_item() {
    let mut source = MockSourcePlugin::new();
    source.expect_validate().returning(|| true);
    source
        .expect_fetch()
        .returning(|| Ok(FetchReport::complete(items(&["alpha", "beta"]))));

    let mut target = MockTargetPlugin::new();
    target.expect_validate().returning(|| true);
    target.expect_archive().returning(|mut items| {
        let beta = items.pop().unwrap();
        Ok(ArchiveReport {
            archived: items,
            failures: vec![ItemFailure::upload(beta.name, "connection reset")],
        })
    });

    let report = run_resolved(
        &resolved_source("local", source),
        &resolved_target("owncloud", target),
    )
    .await
    .unwrap();

    assert_eq!(report.archived, 1);
    assert_eq!(report.archive_failures.len(), 1);
    assert!(!report.is_complete_success());
    assert_eq!(report.exit_code(), 2);
    assert!(report.to_string().contains("beta"));
}

#[tokio::test]
async fn nothing_fetched_skips_archive() {
    let mut source = MockSourcePlugin::new();
    source.expect_validate().returning(|| true);
    source.expect_fetch().returning(|| {
        Ok(FetchReport {
            items: Vec::new(),
            failures: vec![
                ItemFailure::retrieval("alpha", "timeout"),
                ItemFailure::retrieval("beta", "timeout"),
            ],
        })
    });

    let mut target = MockTargetPlugin::new();
    target.expect_validate().returning(|| true);
    target.expect_archive().never();

    let err = run_resolved(
        &resolved_source("github", source),
        &resolved_target("scp", target),
    )
    .await
    .unwrap_err();

    assert_eq!(err.code(), "retrieval_failed");
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn empty_inventory_is_a_successful_run() {
    let mut source = MockSourcePlugin::new();
    source.expect_validate().returning(|| true);
    source
        .expect_fetch()
        .returning(|| Ok(FetchReport::default()));

    let mut target = MockTargetPlugin::new();
    target.expect_validate().returning(|| true);
    target
        .expect_archive()
        .withf(|items| items.is_empty())
        .times(1)
        .returning(|_| Ok(ArchiveReport::default()));

    let report = run_resolved(
        &resolved_source("github", source),
        &resolved_target("no_op", target),
    )
    .await
    .unwrap();

    assert_eq!(report.fetched, 0);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn fetch_stage_error_aborts_the_run() {
    let mut source = MockSourcePlugin::new();
    source.expect_validate().returning(|| true);
    source.expect_fetch().returning(|| {
        Err(PluginError::Api {
            service: "github".into(),
            status: 401,
            body: "Bad credentials".into(),
        })
    });

    let mut target = MockTargetPlugin::new();
    target.expect_validate().returning(|| true);
    target.expect_archive().never();

    let err = run_resolved(
        &resolved_source("github", source),
        &resolved_target("scp", target),
    )
    .await
    .unwrap_err();

    assert_eq!(err.code(), "fetch_failed");
    assert_eq!(err.exit_code(), 2);
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn archive_stage_error_still_finishes_the_run() {
    let mut source = MockSourcePlugin::new();
    source.expect_validate().returning(|| true);
    source
        .expect_fetch()
        .returning(|| Ok(FetchReport::complete(items(&["alpha"]))));

    let mut target = MockTargetPlugin::new();
    target.expect_validate().returning(|| true);
    target
        .expect_archive()
        .times(1)
        .returning(|_| Err(PluginError::Protocol("upload host unreachable".into())));

    let report = run_resolved(
        &resolved_source("github", source),
        &resolved_target("scp", target),
    )
    .await
    .unwrap();

    assert_eq!(report.fetched, 1);
    assert_eq!(report.archived, 0);
    assert!(report
        .archive_error
        .as_deref()
        .is_some_and(|e| e.contains("upload host unreachable")));
    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.states.last(), Some(&RunState::Done));
    assert!(!report.states.contains(&RunState::Aborted));
    assert!(report.to_string().contains("archive with target scp failed"));
}

#[tokio::test]
async fn archiving_the_same_items_twice_is_allowed() {
    let target = resolved_target("no_op", {
        let mut target = MockTargetPlugin::new();
        target.expect_archive().times(2).returning(|items| {
            Ok(ArchiveReport {
                archived: items,
                failures: Vec::new(),
            })
        });
        target
    });

    let batch = items(&["alpha", "beta"]);
    let first = target.plugin.archive(batch.clone()).await.unwrap();
    let second = target.plugin.archive(batch.clone()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second.archived, batch);
}

fn registry_with(sources: &[&'static str], targets: &[&'static str]) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    for name in sources {
        registry.register_source(name, |_: &PluginContext| -> Box<dyn SourcePlugin> {
            let mut source = MockSourcePlugin::new();
            source.expect_validate().returning(|| true);
            source
                .expect_help()
                .returning(|| "needs CRONO_GITHUB_TOKEN".to_string());
            source
                .expect_fetch()
                .returning(|| Ok(FetchReport::complete(items(&["alpha"]))));
            Box::new(source)
        });
    }
    for name in targets {
        registry.register_target(name, |_: &PluginContext| -> Box<dyn TargetPlugin> {
            let mut target = MockTargetPlugin::new();
            target.expect_validate().returning(|| true);
            target
                .expect_help()
                .returning(|| "needs CRONOHUB_SCP_HOST".to_string());
            target.expect_archive().returning(|items| {
                Ok(ArchiveReport {
                    archived: items,
                    failures: Vec::new(),
                })
            });
            Box::new(target)
        });
    }
    registry
}

#[tokio::test]
async fn unknown_target_is_reported_by_name() {
    let dir = tempdir().unwrap();
    let registry = registry_with(&["github"], &["scp"]);
    let orchestrator = Orchestrator::new(&registry, PluginContext::new(dir.path(), dir.path()));

    let err = orchestrator.run("github", "s3").await.unwrap_err();

    assert!(matches!(
        err,
        RunError::PluginNotFound {
            role: PluginRole::Target,
            ..
        }
    ));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(err.to_string(), "target plugin not found: s3");
}

#[tokio::test]
async fn unknown_source_is_reported_by_name() {
    let dir = tempdir().unwrap();
    let registry = registry_with(&["github"], &["scp"]);
    let orchestrator = Orchestrator::new(&registry, PluginContext::new(dir.path(), dir.path()));

    let err = orchestrator.run("bitbucket", "scp").await.unwrap_err();

    assert_eq!(err.code(), "plugin_not_found");
    assert!(err.to_string().contains("bitbucket"));
}

#[tokio::test]
async fn registry_run_uses_the_bundled_plugins() {
    let dir = tempdir().unwrap();
    let registry = registry_with(&["github"], &["scp"]);
    let orchestrator = Orchestrator::new(&registry, PluginContext::new(dir.path(), dir.path()));

    let report = orchestrator.run("github", "scp").await.unwrap();

    assert_eq!(report.source, "github");
    assert_eq!(report.target, "scp");
    assert_eq!(report.archived, 1);
    assert_eq!(report.states.last(), Some(&RunState::Done));
}

#[test]
fn help_does_not_validate_or_fetch() {
    let dir = tempdir().unwrap();
    let mut registry = PluginRegistry::new();
    registry.register_source("github", |_: &PluginContext| -> Box<dyn SourcePlugin> {
        let mut source = MockSourcePlugin::new();
        source.expect_validate().never();
        source.expect_fetch().never();
        source
            .expect_help()
            .times(1)
            .returning(|| "set CRONO_GITHUB_TOKEN".to_string());
        Box::new(source)
    });
    let orchestrator = Orchestrator::new(&registry, PluginContext::new(dir.path(), dir.path()));

    let text = orchestrator.help(PluginRole::Source, "github").unwrap();
    assert!(text.contains("CRONO_GITHUB_TOKEN"));

    let err = orchestrator.help(PluginRole::Target, "github").unwrap_err();
    assert_eq!(err.to_string(), "target plugin not found: github");
}
