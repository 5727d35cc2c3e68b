//! Composition of source map chains.
//!
//! Each transform step emits a map from its output to its input. Serving
//! the browser needs a single map from the final output back to the
//! original file, so the per-step maps are folded left to right.

use sourcemap::{SourceMap, SourceMapBuilder};

use crate::error::{PipelineError, Result};

pub fn parse(json: &str) -> Result<SourceMap> {
    SourceMap::from_slice(json.as_bytes())
        .map_err(|err| PipelineError::SourceMap(err.to_string()))
}

pub fn serialize(map: &SourceMap) -> Result<String> {
    let mut out = Vec::new();
    map.to_writer(&mut out)
        .map_err(|err| PipelineError::SourceMap(err.to_string()))?;
    String::from_utf8(out).map_err(|err| PipelineError::SourceMap(err.to_string()))
}

/// Compose two adjacent maps: `current` maps output positions into the
/// intermediate text, `previous` maps intermediate positions into the
/// original. Tokens that land before any mapping in `previous` are
/// dropped, since they have no original position.
pub fn merge(previous: &SourceMap, current: &SourceMap) -> SourceMap {
    let mut builder = SourceMapBuilder::new(current.get_file());
    for token in current.tokens() {
        let Some(original) = previous.lookup_token(token.get_src_line(), token.get_src_col())
        else {
            continue;
        };
        let src_id = original.get_source().map(|source| {
            let id = builder.add_source(source);
            builder.set_source_contents(id, previous.get_source_contents(original.get_src_id()));
            id
        });
        let name_id = original
            .get_name()
            .or_else(|| token.get_name())
            .map(|name| builder.add_name(name));
        builder.add_raw(
            token.get_dst_line(),
            token.get_dst_col(),
            original.get_src_line(),
            original.get_src_col(),
            src_id,
            name_id,
            false,
        );
    }
    builder.into_sourcemap()
}

/// Fold a chain of serialized maps, oldest first, into one serialized map
/// from the final output to the original source.
pub fn fold(maps: &[String]) -> Result<Option<String>> {
    let mut iter = maps.iter();
    let Some(first) = iter.next() else {
        return Ok(None);
    };
    let mut acc = parse(first)?;
    for json in iter {
        let current = parse(json)?;
        acc = merge(&acc, &current);
    }
    serialize(&acc).map(Some)
}
