use crate::{
    config::SyncConfig,
    syncer::Syncer,
    types::{Frame, FrameSource, OutputStream},
};
use eyre::{Result, eyre};
use futures::{
    StreamExt,
    stream::{self, Stream},
};
use std::{
    sync::Arc,
    task::{Context, Poll, Poll::*},
};
use tracing::warn;

/// Consume a stream of frames and emit the synchronized units.
///
/// Frames are dispatched into a [Syncer] in the order the input yields
/// them. When the input ends, the configured shutdown policy is applied
/// and the remaining units are emitted before the output ends. A frame
/// rejected by the synchronizer yields an error item; an error from the
/// input ends the output.
pub fn sync<'a, F, S>(
    stream: S,
    config: SyncConfig,
    source: Arc<dyn FrameSource<F>>,
) -> Result<OutputStream<'a, F>>
where
    F: Frame,
    S: Stream<Item = Result<F>> + Unpin + Send + 'a,
{
    let syncer = Syncer::new(config, source)?;

    // Units leave the matcher tree through a channel so that the
    // callback does not need to reach into the polling state.
    let (output_tx, output_rx) = flume::unbounded();
    syncer.set_callback(move |unit, _source| {
        output_tx
            .send(unit)
            .map_err(|_| eyre!("the output stream was dropped"))
    });
    syncer.set_unmatched_callback(|frame: F, _source| {
        warn!(
            stream = %frame.stream_type(),
            number = frame.frame_number(),
            "frame left unmatched"
        );
        Ok(())
    });

    let mut state = State {
        input: Some(stream),
        syncer: Some(syncer),
        output_rx,
    };

    let output_stream = stream::poll_fn(move |ctx| poll(&mut state, ctx));
    Ok(output_stream.boxed())
}

struct State<F, S>
where
    F: Frame,
{
    input: Option<S>,
    syncer: Option<Syncer<F>>,
    output_rx: flume::Receiver<F>,
}

/// The polling function is repeatedly called to emit synchronized units.
fn poll<F, S>(state: &mut State<F, S>, ctx: &mut Context<'_>) -> Poll<Option<Result<F>>>
where
    F: Frame,
    S: Stream<Item = Result<F>> + Unpin + Send,
{
    loop {
        if let Ok(unit) = state.output_rx.try_recv() {
            return Ready(Some(Ok(unit)));
        }

        let Some(input) = state.input.as_mut() else {
            // Case: the input is depleted and every unit was emitted.
            return Ready(None);
        };

        match input.poll_next_unpin(ctx) {
            Ready(Some(Ok(frame))) => {
                let Some(syncer) = &state.syncer else {
                    continue;
                };
                if let Err(err) = syncer.dispatch(frame) {
                    return Ready(Some(Err(err)));
                }
            }
            Ready(Some(Err(err))) => {
                // An error is returned by the input. Staged frames are
                // dropped along with the synchronizer.
                state.input = None;
                state.syncer = None;
                return Ready(Some(Err(err)));
            }
            Ready(None) => {
                // The input is depleted. Apply the shutdown policy and
                // drain the units it produces.
                state.input = None;
                if let Some(syncer) = state.syncer.take()
                    && let Err(err) = syncer.shutdown()
                {
                    return Ready(Some(Err(err)));
                }
            }
            Pending => {
                return Pending;
            }
        }
    }
}
