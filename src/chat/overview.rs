//! The overview handler. Assignment overviews are not built yet; this
//! streams a stock response so the intent has a clean landing spot until the
//! real handler exists.

use std::time::Instant;

use crate::chat::ChatRequestContext;
use crate::chat::queries;
use crate::chat::summarize::stream_canned;
use crate::error::PlatformError;
use crate::services::Services;
use crate::transport::WsMessage;

const UNAVAILABLE_MESSAGE: &str = "I'm currently unable to answer questions about assignment \
overviews. Please try again in the near future.";

pub async fn handle(services: &Services, ctx: &ChatRequestContext) -> Result<(), PlatformError> {
    let started = Instant::now();

    let course_id = services
        .courses
        .resolve(&ctx.course_name)
        .map(|course| course.course_id.clone());

    stream_canned(services, &ctx.connection_id, UNAVAILABLE_MESSAGE).await;
    let _ = services
        .transport
        .post_to_connection(&ctx.connection_id, &WsMessage::done(None))
        .await;

    if let Some(course_id) = course_id {
        let record = queries::base_record(
            ctx,
            &course_id,
            services.embedder.model_name(),
            started.elapsed().as_millis() as u64,
        );
        queries::persist(services.query_log.as_ref(), record).await;
    }

    Ok(())
}
