use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tilemove::world::PreloadStatus;
use tilemove::{
    load_map_file, CharacterId, ConfigError, ContentError, KernelCue, MapDirectory, MapWorld,
    MovementConfig, ScriptError, ScriptHost, TemplatePreload, TemplateRegistry,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_ENV_VAR: &str = "TILEMOVE_CONFIG";
const MAP_ENV_VAR: &str = "TILEMOVE_MAP";
const TICKS_ENV_VAR: &str = "TILEMOVE_TICKS";
const TEMPLATES_ENV_VAR: &str = "TILEMOVE_TEMPLATES";
const DEFAULT_TICKS: u64 = 600;

#[derive(Debug, Error)]
enum HostError {
    #[error("TILEMOVE_MAP is not set; point it at a map json file")]
    MissingMap,
    #[error("TILEMOVE_TICKS must be a tick count, got '{0}'")]
    BadTicks(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error("read template registry '{path}': {source}")]
    RegistryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse template registry '{path}': {source}")]
    RegistryParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("encode summary: {0}")]
    Summary(#[from] serde_json::Error),
}

/// Scripts have no interpreter here; they are logged and accepted.
struct LoggingScriptHost;

impl ScriptHost for LoggingScriptHost {
    fn run_script(&mut self, character: CharacterId, source: &str) -> Result<(), ScriptError> {
        info!(character = character.0, source, "route_script");
        Ok(())
    }
}

fn main() {
    init_tracing();
    info!("=== tilemove host ===");
    if let Err(err) = run() {
        error!(error = %err, "host_failed");
        std::process::exit(1);
    }
}

fn run() -> Result<(), HostError> {
    let config = match env::var_os(CONFIG_ENV_VAR) {
        Some(path) => MovementConfig::load(Path::new(&path))?,
        None => MovementConfig::default(),
    };
    let map_path = env::var_os(MAP_ENV_VAR)
        .map(PathBuf::from)
        .ok_or(HostError::MissingMap)?;
    let ticks = parse_ticks(env::var(TICKS_ENV_VAR).ok().as_deref())?;

    let map = load_map_file(&map_path)?;
    let mut world = MapWorld::new(config, map);

    if let Some(path) = env::var_os(TEMPLATES_ENV_VAR).map(PathBuf::from) {
        let registry = load_registry(&path)?;
        let maps_root = map_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let preload = TemplatePreload::start(MapDirectory::new(maps_root), registry.map_ids());
        match preload.wait(world.templates_mut()) {
            PreloadStatus::Complete { loaded, failed } if failed > 0 => {
                warn!(loaded, failed, "template_preload_incomplete");
            }
            status => debug!(?status, "template_preload_done"),
        }
        world.set_registry(registry);
    }

    let mut host = LoggingScriptHost;
    for _ in 0..ticks {
        world.update(&mut host);
        for cue in world.drain_cues() {
            log_cue(&cue);
        }
    }

    println!("{}", serde_json::to_string_pretty(&summary(&world))?);
    Ok(())
}

fn parse_ticks(raw: Option<&str>) -> Result<u64, HostError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(DEFAULT_TICKS),
        Some(value) => value
            .parse()
            .map_err(|_| HostError::BadTicks(value.to_string())),
    }
}

fn load_registry(path: &Path) -> Result<TemplateRegistry, HostError> {
    let raw = fs::read_to_string(path).map_err(|source| HostError::RegistryRead {
        path: path.to_path_buf(),
        source,
    })?;
    let registry: TemplateRegistry =
        serde_json::from_str(&raw).map_err(|source| HostError::RegistryParse {
            path: path.to_path_buf(),
            source,
        })?;
    info!(templates = registry.len(), "template_registry_loaded");
    Ok(registry)
}

fn log_cue(cue: &KernelCue) {
    match cue {
        KernelCue::Lifecycle(lifecycle) => info!(?lifecycle, "lifecycle_cue"),
        other => debug!(cue = ?other, "kernel_cue"),
    }
}

fn summary(world: &MapWorld) -> serde_json::Value {
    let characters: Vec<serde_json::Value> = world
        .characters()
        .iter()
        .map(|character| {
            serde_json::json!({
                "id": character.id.0,
                "x": character.position.x,
                "y": character.position.y,
                "direction": character.direction,
                "page": character.page,
            })
        })
        .collect();
    serde_json::json!({
        "map_id": world.map_id(),
        "ticks": world.tick_count(),
        "self_state_entries": world.state().self_state().len(),
        "characters": characters,
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_count_defaults_when_unset_or_blank() {
        assert_eq!(parse_ticks(None).expect("default"), DEFAULT_TICKS);
        assert_eq!(parse_ticks(Some("  ")).expect("blank"), DEFAULT_TICKS);
        assert_eq!(parse_ticks(Some("42")).expect("number"), 42);
        assert!(matches!(parse_ticks(Some("soon")), Err(HostError::BadTicks(_))));
    }

    #[test]
    fn registry_files_load_by_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("templates.json");
        fs::write(&path, r#"{"Crate": {"map_id": 2, "event_id": 1}}"#).expect("write");
        let registry = load_registry(&path).expect("registry");
        assert_eq!(registry.map_ids(), vec![2]);
        assert!(matches!(
            load_registry(&dir.path().join("missing.json")),
            Err(HostError::RegistryRead { .. })
        ));
    }
}
