pub mod api;
mod error;
pub mod reconciler;
mod storage;
pub mod trigger;

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::sync::mpsc::channel;
use tracing::{info, instrument};

pub use api::ServerConfig;
pub use error::ControllerError;

use crate::config::{Config, CHANNEL_SIZE};
use crate::datastore::{BoardDataStore, Database, PathPattern};
use crate::model::board::task_pattern;
use crate::model::BoardResolver;

use self::storage::RequestResponse;

type Shared<D> = Arc<D>;

pub struct BoardController<D>
where
    D: Database,
{
    _database: Shared<D>,
    _storage_runtime: Runtime,
    _trigger_runtime: Runtime,
    _api_runtime: Runtime,
    _reconciler_runtime: Option<Runtime>,
}

impl<D> BoardController<D>
where
    D: Database,
{
    /// Starts the storage service, the counter trigger, the API and, when
    /// configured, the reconciler, each on its own runtime.
    #[instrument(skip(database, cfg))]
    pub fn start(database: Shared<D>, cfg: &Config) -> anyhow::Result<Self> {
        let resolver = Arc::new(BoardResolver::new(&cfg.boards)?);

        // subscribed before the API accepts writes, so no change is missed
        let listener = database.on_write(PathPattern::parse(&task_pattern())?);
        let backlog = listener.backlog();
        let trigger_runtime =
            trigger::build_runtime(database.clone(), listener, cfg.counter.clone())?;

        let (tx_storage, rx_storage) = channel::<RequestResponse>(CHANNEL_SIZE);
        let datastore = Arc::new(BoardDataStore::new(database.clone()));
        let storage_service = storage::StorageService::new(datastore, rx_storage);
        let storage_runtime = storage_service.build_runtime()?;

        let reconciler_runtime = match cfg.reconcile.interval {
            Some(interval) => Some(reconciler::build_runtime(
                database.clone(),
                resolver.boards(),
                interval,
                cfg.counter.clone(),
                backlog,
            )?),
            None => None,
        };

        let api_runtime = api::build_runtime(
            ServerConfig {
                host: cfg.listen.host.clone(),
                port: cfg.listen.port,
                concurrent: cfg.listen.concurrent,
                timeout: cfg.listen.timeout,
                strict_status: cfg.http.strict_status,
            },
            tx_storage,
            resolver,
        )?;
        info!(port = cfg.listen.port, "controller started");

        Ok(Self {
            _database: database,
            _storage_runtime: storage_runtime,
            _trigger_runtime: trigger_runtime,
            _api_runtime: api_runtime,
            _reconciler_runtime: reconciler_runtime,
        })
    }

    pub fn stop(self) -> Result<(), ControllerError> {
        self._api_runtime.shutdown_background();
        if let Some(runtime) = self._reconciler_runtime {
            runtime.shutdown_timeout(Duration::from_millis(20));
        }
        self._storage_runtime
            .shutdown_timeout(Duration::from_millis(100));
        // let in-flight counter transactions land
        std::thread::sleep(Duration::from_millis(100));
        self._trigger_runtime
            .shutdown_timeout(Duration::from_millis(100));
        Ok(())
    }
}
