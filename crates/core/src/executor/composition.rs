//! Maps edit requests to transcoder compositions.

use crate::operation::{EditRequest, OperationError, OperationKind};
use crate::transcoder::{Composition, CompositionItem};

/// Builds the composition for a request.
///
/// The request is validated again here so a composition is never built
/// from bad parameters.
pub fn build_composition(request: &EditRequest) -> Result<Composition, OperationError> {
    request.validate()?;

    let composition = match &request.kind {
        OperationKind::Trim { start_ms, end_ms } => Composition::single(
            single_item(request)?.with_clip(*start_ms, *end_ms),
        ),
        OperationKind::Rotate { degrees } => {
            Composition::single(single_item(request)?.with_rotation(*degrees))
        }
        OperationKind::Merge { .. } => Composition::sequence(
            request
                .inputs
                .iter()
                .map(|input| CompositionItem::new(input).with_remove_audio(request.remove_audio))
                .collect(),
        ),
        OperationKind::TrimAndRotate {
            start_ms,
            end_ms,
            degrees,
        } => Composition::single(
            single_item(request)?
                .with_clip(*start_ms, *end_ms)
                .with_rotation(*degrees),
        ),
    };

    Ok(composition)
}

fn single_item(request: &EditRequest) -> Result<CompositionItem, OperationError> {
    let input = request
        .inputs
        .first()
        .ok_or_else(|| OperationError::invalid_input("Missing input"))?;
    Ok(CompositionItem::new(input).with_remove_audio(request.remove_audio))
}
