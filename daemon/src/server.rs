//! gRPC server for daemon control.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status};

use murmur_proto::murmur_server::{Murmur, MurmurServer};
use murmur_proto::{
    Empty, Event, LanguageInfo, LoadModelRequest, ModelList, ModelRef, SetLanguageRequest,
    SetTaskRequest, TranscribeFileRequest,
};

use crate::controller::Controller;

/// gRPC service implementation.
pub struct MurmurService {
    controller: Arc<Controller>,
}

impl MurmurService {
    /// Create a new service with the given controller.
    pub fn new(controller: Arc<Controller>) -> Self {
        Self { controller }
    }

    /// Create the tonic server.
    pub fn into_server(self) -> MurmurServer<Self> {
        MurmurServer::new(self)
    }
}

#[tonic::async_trait]
impl Murmur for MurmurService {
    async fn get_status(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<murmur_proto::Status>, Status> {
        Ok(Response::new(self.controller.status().await))
    }

    type SubscribeStream = Pin<Box<dyn Stream<Item = Result<Event, Status>> + Send>>;

    async fn subscribe(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        let rx = self.controller.event_sender().subscribe();
        let stream = BroadcastStream::new(rx)
            .map(|result| result.map_err(|e| Status::internal(format!("Broadcast error: {e}"))));
        Ok(Response::new(Box::pin(stream)))
    }

    async fn list_models(&self, _request: Request<Empty>) -> Result<Response<ModelList>, Status> {
        let (models, selected) = self.controller.list_models().await;
        Ok(Response::new(ModelList {
            models: models
                .into_iter()
                .map(|m| murmur_proto::ModelEntry {
                    name: m.name,
                    local: m.local,
                    disabled: m.disabled,
                })
                .collect(),
            selected,
        }))
    }

    async fn load_model(
        &self,
        request: Request<LoadModelRequest>,
    ) -> Result<Response<Empty>, Status> {
        let request = request.into_inner();
        if request.model.is_empty() {
            return Err(Status::invalid_argument("model name is empty"));
        }
        self.controller
            .load_model(Some(request.model), request.force_redownload)
            .await;
        Ok(Response::new(Empty {}))
    }

    async fn delete_model(&self, request: Request<ModelRef>) -> Result<Response<Empty>, Status> {
        self.controller
            .delete_model(&request.into_inner().model)
            .await
            .map_err(Status::not_found)?;
        Ok(Response::new(Empty {}))
    }

    async fn get_language(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<LanguageInfo>, Status> {
        let (language, available) = self.controller.get_language_info().await;
        Ok(Response::new(LanguageInfo {
            language,
            available,
        }))
    }

    async fn set_language(
        &self,
        request: Request<SetLanguageRequest>,
    ) -> Result<Response<Empty>, Status> {
        self.controller
            .set_language(&request.into_inner().language)
            .await
            .map_err(Status::invalid_argument)?;
        Ok(Response::new(Empty {}))
    }

    async fn set_task(&self, request: Request<SetTaskRequest>) -> Result<Response<Empty>, Status> {
        self.controller
            .set_task(&request.into_inner().task)
            .await
            .map_err(Status::invalid_argument)?;
        Ok(Response::new(Empty {}))
    }

    async fn transcribe_file(
        &self,
        request: Request<TranscribeFileRequest>,
    ) -> Result<Response<Empty>, Status> {
        let path = PathBuf::from(request.into_inner().path);
        if !path.is_absolute() {
            return Err(Status::invalid_argument("path must be absolute"));
        }
        self.controller
            .transcribe_file(path)
            .await
            .map_err(Status::failed_precondition)?;
        Ok(Response::new(Empty {}))
    }

    async fn cancel_run(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        self.controller.cancel_run();
        Ok(Response::new(Empty {}))
    }

    async fn start_streaming(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        self.controller
            .start_streaming()
            .await
            .map_err(Status::failed_precondition)?;
        Ok(Response::new(Empty {}))
    }

    async fn stop_streaming(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        self.controller
            .stop_streaming()
            .map_err(Status::failed_precondition)?;
        Ok(Response::new(Empty {}))
    }

    async fn shutdown(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        self.controller.shutdown().await;
        Ok(Response::new(Empty {}))
    }
}
