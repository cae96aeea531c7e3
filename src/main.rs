use std::{process, sync::Arc};

use published_cache::{
    application::{convert::ConverterRegistry, error::AppError, repos::DurableCacheStore},
    cache::{CacheConfig, CancellationFlag},
    config,
    infra::{
        memory::{Fixture, InMemoryRepository},
        side_store::JsonSideStore,
        telemetry,
    },
    published::{DefaultSnapshotService, PublishedSnapshotService, ServiceDeps},
};
use serde_json::{Map, Value};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

const CLI_PREVIEW_TOKEN: &str = "cli";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match cli_args.command {
        config::Command::Inspect(args) => run_inspect(settings, args).await,
        config::Command::Rebuild(args) => run_rebuild(settings, args).await,
    }
}

fn build_service(
    settings: &config::Settings,
    side_store: Option<Arc<dyn DurableCacheStore>>,
) -> Result<DefaultSnapshotService, AppError> {
    let path = settings
        .fixture
        .as_ref()
        .ok_or_else(|| AppError::validation("a content fixture is required (--fixture PATH)"))?;
    let repository = Arc::new(InMemoryRepository::from_fixture(Fixture::load(path)?));

    let deps = ServiceDeps {
        content: repository.clone(),
        content_types: repository.clone(),
        domains: repository,
        side_store,
        converters: ConverterRegistry::with_builtins(),
    };
    Ok(DefaultSnapshotService::new(
        CacheConfig::from(&settings.cache),
        deps,
    ))
}

async fn run_inspect(settings: config::Settings, args: config::InspectArgs) -> Result<(), AppError> {
    let service = build_service(&settings, None)?;

    let output = tokio::task::spawn_blocking(move || -> Result<Value, AppError> {
        let token = args.preview.then_some(CLI_PREVIEW_TOKEN);
        let snapshot = service.create_snapshot(token)?;
        let element = snapshot
            .content()
            .get_by_id(args.node_id)?
            .ok_or_else(|| AppError::not_found(format!("document {}", args.node_id)))?;

        let mut properties = Map::new();
        for property in element.properties() {
            let value = match property.get_value_for(args.culture.as_deref(), None) {
                Ok(value) => value.to_json(),
                Err(err) => {
                    error!(alias = property.alias(), error = %err, "property conversion failed");
                    Value::Null
                }
            };
            properties.insert(property.alias().to_string(), value);
        }

        let mut object = Map::new();
        object.insert("id".into(), Value::from(args.node_id));
        object.insert("key".into(), Value::String(element.key().to_string()));
        object.insert(
            "contentType".into(),
            Value::String(element.content_type().alias.clone()),
        );
        object.insert("previewing".into(), Value::Bool(snapshot.previewing()));
        object.insert("properties".into(), Value::Object(properties));
        let domains = snapshot.domains().get_assigned(args.node_id, false);
        object.insert(
            "domains".into(),
            Value::Array(
                domains
                    .into_iter()
                    .map(|domain| Value::String(domain.name))
                    .collect(),
            ),
        );
        snapshot.dispose();
        Ok(Value::Object(object))
    })
    .await
    .map_err(|err| AppError::unexpected(format!("inspect task failed: {err}")))??;

    let rendered = serde_json::to_string_pretty(&output)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}

async fn run_rebuild(settings: config::Settings, args: config::RebuildArgs) -> Result<(), AppError> {
    let side_store = Arc::new(JsonSideStore::new(settings.side_store.directory.clone())?);
    let service = build_service(&settings, Some(side_store))?;

    let summary = tokio::task::spawn_blocking(move || {
        let everything: &[i32] = &[];
        let cancel = CancellationFlag::new();
        if args.is_unscoped() {
            service.rebuild(Some(everything), Some(everything), Some(everything), &cancel)
        } else {
            service.rebuild(
                args.content_types.as_deref(),
                args.media_types.as_deref(),
                args.member_types.as_deref(),
                &cancel,
            )
        }
    })
    .await
    .map_err(|err| AppError::unexpected(format!("rebuild task failed: {err}")))??;

    info!(
        content_types = summary.content_types,
        nodes = summary.nodes,
        directory = %settings.side_store.directory.display(),
        "Rebuild complete"
    );
    Ok(())
}
