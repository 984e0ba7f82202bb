use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::controller::ControllerError;
use crate::datastore::{DataStoreError, TaskDataStore};
use crate::model::{BoardRef, Fields, TaskId, TaskList};

use super::Shared;

#[derive(Debug)]
pub enum StorageServiceRequest {
    Create(BoardRef, Fields),
    List(BoardRef),
    Update(BoardRef, TaskId, Fields),
    Delete(BoardRef, TaskId),
}

impl StorageServiceRequest {
    fn board(&self) -> &BoardRef {
        match self {
            StorageServiceRequest::Create(board, _)
            | StorageServiceRequest::List(board)
            | StorageServiceRequest::Update(board, _, _)
            | StorageServiceRequest::Delete(board, _) => board,
        }
    }
}

#[derive(Debug)]
pub enum StorageServiceResponse {
    List(TaskList),
    Error(DataStoreError),
}

impl TryFrom<StorageServiceResponse> for TaskList {
    type Error = ControllerError;

    fn try_from(value: StorageServiceResponse) -> Result<Self, Self::Error> {
        match value {
            StorageServiceResponse::List(tasks) => Ok(tasks),
            StorageServiceResponse::Error(err) => Err(ControllerError::DataStore(err)),
        }
    }
}

pub type RequestResponse = (
    StorageServiceRequest,
    oneshot::Sender<StorageServiceResponse>,
);

pub struct StorageService<D: TaskDataStore> {
    storage: Shared<D>,
    rx: Receiver<RequestResponse>,
}

impl<D: TaskDataStore> StorageService<D> {
    pub fn new(storage: Shared<D>, rx: Receiver<RequestResponse>) -> Self {
        Self { storage, rx }
    }

    pub fn build_runtime(self) -> anyhow::Result<Runtime> {
        let runtime = Builder::new_multi_thread()
            .thread_name("storage")
            .enable_all()
            .build()?;

        runtime.handle().spawn(self.start());
        Ok(runtime)
    }

    pub async fn start(mut self) {
        while let Some((request, response_sender)) = self.rx.recv().await {
            let storage = self.storage.clone();
            tokio::spawn(async move {
                let response = match handle_request(storage.as_ref(), request).await {
                    Ok(tasks) => StorageServiceResponse::List(tasks),
                    Err(err) => StorageServiceResponse::Error(err),
                };
                if response_sender.send(response).is_err() {
                    debug!("storage response receiver dropped");
                }
            });
        }
    }
}

/// Applies the request and reads the board's task list back.
async fn handle_request<D: TaskDataStore>(
    storage: &D,
    request: StorageServiceRequest,
) -> Result<TaskList, DataStoreError> {
    let board = request.board().clone();
    let applied = match request {
        StorageServiceRequest::Create(board, fields) => {
            storage.create_task(&board, fields).await.map(|_| ())
        }
        StorageServiceRequest::List(_) => Ok(()),
        StorageServiceRequest::Update(board, id, fields) => {
            storage.update_task(&board, &id, fields).await
        }
        StorageServiceRequest::Delete(board, id) => storage.delete_task(&board, &id).await,
    };

    let response = match applied {
        Ok(()) => storage.list_tasks(&board).await.map(TaskList::from),
        Err(err) => Err(err),
    };
    if let Err(err) = &response {
        error!(err = %err, board = %board, "Unable to execute storage service request.");
    }
    response
}

pub async fn send<T>(
    tx_storage: Sender<RequestResponse>,
    request: StorageServiceRequest,
) -> Result<T, ControllerError>
where
    T: TryFrom<StorageServiceResponse, Error = ControllerError>,
{
    let (req_sender, callback) = tokio::sync::oneshot::channel();
    tx_storage
        .send((request, req_sender))
        .await
        .map_err(|err| ControllerError::StorageServiceError(err.to_string()))?;

    let res = callback
        .await
        .map_err(|err| ControllerError::StorageServiceError(err.to_string()))?;
    T::try_from(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BoardsConfig;
    use crate::datastore::{BoardDataStore, MemoryDatabase, StorageError};
    use crate::model::BoardResolver;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc::channel;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().unwrap().clone()
    }

    fn start_service() -> Sender<RequestResponse> {
        let ds = Arc::new(BoardDataStore::new(Arc::new(MemoryDatabase::new())));
        let (tx_storage, rx_storage) = channel::<RequestResponse>(32);
        let storage_service = StorageService::new(ds, rx_storage);
        tokio::spawn(async move {
            storage_service.start().await;
        });
        tx_storage
    }

    #[tokio::test]
    async fn test_handle_storage_service_request() {
        // GIVEN
        let tx_storage = start_service();
        let resolver = BoardResolver::new(&BoardsConfig::default()).unwrap();
        let sales = resolver.resolve(Some("sales")).unwrap();

        // WHEN
        let created: TaskList = send(
            tx_storage.clone(),
            StorageServiceRequest::Create(sales.clone(), fields(json!({"title": "x"}))),
        )
        .await
        .unwrap();

        // THEN
        assert_eq!(created.num_tasks, 1);
        let id = TaskId::parse(created.tasks[0].id().unwrap()).unwrap();

        let updated: TaskList = send(
            tx_storage.clone(),
            StorageServiceRequest::Update(
                sales.clone(),
                id.clone(),
                fields(json!({"id": id.as_str(), "title": "y"})),
            ),
        )
        .await
        .unwrap();
        assert_eq!(updated.num_tasks, 1);
        assert_eq!(updated.tasks[0].fields()["title"], "y");

        let listed: TaskList = send(tx_storage.clone(), StorageServiceRequest::List(sales.clone()))
            .await
            .unwrap();
        assert_eq!(listed, updated);

        let deleted: TaskList = send(tx_storage.clone(), StorageServiceRequest::Delete(sales, id))
            .await
            .unwrap();
        assert_eq!(deleted, TaskList::from(vec![]));
    }

    #[tokio::test]
    async fn test_failed_request_returns_the_error() {
        // GIVEN
        let tx_storage = start_service();
        let resolver = BoardResolver::new(&BoardsConfig::default()).unwrap();
        let board = resolver.resolve(Some("rd")).unwrap();

        // WHEN
        let result: Result<TaskList, _> = send(
            tx_storage,
            StorageServiceRequest::Create(board, fields(json!({"bad/key": 1}))),
        )
        .await;

        // THEN
        match result {
            Err(ControllerError::DataStore(DataStoreError::Write { source, .. })) => {
                assert_eq!(source, StorageError::InvalidKey("bad/key".into()))
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_without_service() {
        let (tx_storage, rx_storage) = channel::<RequestResponse>(1);
        drop(rx_storage);
        let resolver = BoardResolver::new(&BoardsConfig::default()).unwrap();

        let result: Result<TaskList, _> = send(
            tx_storage,
            StorageServiceRequest::List(resolver.resolve(Some("rd")).unwrap()),
        )
        .await;

        assert!(matches!(
            result,
            Err(ControllerError::StorageServiceError(_))
        ));
    }
}
