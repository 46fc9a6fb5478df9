use bondgraph_core::StateStore;
use tracing::info;

use crate::{context::Ctx, history::EventDetail, reader::ContractReader, HandlerError};

pub fn set_paused<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    paused: bool,
) -> Result<(), HandlerError> {
    let round = ctx.current_round()?;

    ctx.protocol.paused = paused;

    info!(paused, round = round.id, "protocol pause state changed");

    let detail = match paused {
        true => EventDetail::Pause,
        false => EventDetail::Unpause,
    };

    ctx.record(round.id, detail)?;

    Ok(())
}
