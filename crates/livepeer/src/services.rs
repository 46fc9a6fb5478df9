use bondgraph_core::{Address, StateStore};
use tracing::debug;

use crate::{context::Ctx, history::EventDetail, reader::ContractReader, HandlerError};

pub fn service_uri_update<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    addr: &Address,
    service_uri: &str,
) -> Result<(), HandlerError> {
    let round = ctx.current_round()?;
    let mut transcoder = ctx.transcoder(addr)?;

    transcoder.service_uri = Some(service_uri.to_string());
    ctx.save(&transcoder)?;

    debug!(transcoder = %addr, service_uri, "service uri updated");

    ctx.record(
        round.id,
        EventDetail::ServiceUriUpdate {
            addr: *addr,
            service_uri: service_uri.to_string(),
        },
    )?;

    Ok(())
}
