use crate::config::Config;
use crate::pipeline::UploadPipeline;
use crate::recognition::PlateRecognizerClient;
use crate::tracker::WatchOptions;
use crate::upload;
use crate::websocket;
use failure::Error;
use log::info;
use std::sync::Arc;
use warp::{Filter, Rejection, Reply};

pub fn routes(
    pipeline: Arc<UploadPipeline>,
    max_upload_bytes: u64,
    options: WatchOptions,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST"]);
    upload::route(pipeline, max_upload_bytes)
        .or(websocket::route(options))
        .with(cors)
        .with(warp::log("plate_distance::http"))
}

pub async fn run(config: Config) -> Result<(), Error> {
    let recognizer = PlateRecognizerClient::new(config.recognizer.clone())?;
    let pipeline = Arc::new(UploadPipeline::new(config.pipeline.clone(), Arc::new(recognizer)));
    info!(
        "Staging uploads in {:?}, recognizer at {}",
        config.pipeline.staging_dir, config.recognizer.url
    );
    let routes = routes(pipeline, config.max_upload_bytes, config.watch);
    info!("Listening on port {}", config.port);
    warp::serve(routes).run(([0, 0, 0, 0], config.port)).await;
    Ok(())
}
