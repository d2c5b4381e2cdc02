//! Concept node emission for finalized chunks.
//!
//! Scores the phrases of one finalized chunk, groups near-duplicates, and
//! emits up to five new concept nodes under the chunk's parent keyword,
//! each optionally carrying its group members as child nodes. Emission is
//! gated on the parent keyword actually occurring in the chunk; a chunk
//! that never mentions its parent contributes nothing.

use crate::config::PipelineConfig;
use crate::graph::{base_name, Edge, GraphBatch, KeywordNode, SourceRecord};
use crate::nlp::{EmbeddingProvider, Sentence};
use crate::pipeline::chunker::{BuildContext, FinalizedChunk};
use crate::pipeline::scorer::{group_near_duplicates, score_phrases, ScoredPhrase, TfIdfIndex};
use std::collections::HashMap;

/// Relation label for an edge between `source_phrase` and `target_phrase`.
///
/// The shortest sentence where both occur wins; failing that, the shortest
/// sentence containing the target. The label is cut to `max_chars`.
pub(crate) fn relation_label(
    sentence_texts: &[&str],
    source_phrase: &str,
    target_phrase: &str,
    max_chars: usize,
) -> Option<String> {
    let source_lower = source_phrase.to_lowercase();
    let target_lower = target_phrase.to_lowercase();

    let shortest = |require_source: bool| -> Option<&str> {
        sentence_texts
            .iter()
            .filter(|text| {
                let lower = text.to_lowercase();
                lower.contains(&target_lower) && (!require_source || lower.contains(&source_lower))
            })
            .min_by_key(|text| text.chars().count())
            .copied()
    };

    let sentence = shortest(true).or_else(|| shortest(false))?;
    Some(sentence.trim().chars().take(max_chars).collect())
}

/// Emit concept nodes and edges for one finalized chunk.
pub fn build_chunk_graph(
    chunk: &FinalizedChunk,
    sentences: &[Sentence],
    tfidf: &TfIdfIndex,
    chunk_doc: usize,
    embedder: &dyn EmbeddingProvider,
    config: &PipelineConfig,
    ctx: &mut BuildContext,
    batch: &mut GraphBatch,
) {
    if chunk.keyword.is_empty() {
        return;
    }
    let parent = base_name(&chunk.keyword);

    let phrase_info = collect_phrase_info(chunk, sentences);
    let Some(parent_indices) = phrase_info
        .iter()
        .find(|(phrase, _)| phrase == parent)
        .map(|(_, indices)| indices.clone())
    else {
        tracing::debug!(
            source_id = %ctx.source_id,
            keyword = %chunk.keyword,
            "parent keyword absent from chunk, skipping emission"
        );
        return;
    };

    let chunk_texts: Vec<&str> = chunk
        .sentence_indices
        .iter()
        .map(|&i| sentences[i].text.as_str())
        .collect();

    // The parent gets this chunk's provenance attached; the batch merges it
    // into the node emitted by the hierarchy pass.
    batch.push_node(make_node(
        &chunk.keyword,
        parent,
        &parent_indices,
        sentences,
        &ctx.source_id,
    ));

    let scored = score_phrases(&phrase_info, tfidf, chunk_doc, config);
    let texts: Vec<&str> = scored.iter().map(|s| s.phrase.as_str()).collect();
    let embeddings = embedder.embed_batch(&texts);
    let groups = group_near_duplicates(&scored, &embeddings, config.group_threshold);

    let mut new_nodes = 0usize;
    for group in &groups {
        if new_nodes >= config.max_new_nodes_per_chunk {
            break;
        }
        let rep = &scored[group.representative];
        if rep.phrase == parent {
            continue;
        }

        batch.push_edge(Edge {
            source: chunk.keyword.clone(),
            target: ctx.resolve_name(&rep.phrase),
            relation: relation_label(&chunk_texts, parent, &rep.phrase, config.relation_max_chars)
                .unwrap_or_else(|| "contains".to_string()),
            source_id: ctx.source_id.clone(),
        });

        if !ctx.already_made.contains(&rep.phrase) {
            batch.push_node(make_node(
                &rep.phrase,
                &rep.phrase,
                &rep.sentence_indices,
                sentences,
                &ctx.source_id,
            ));
            ctx.already_made.insert(rep.phrase.clone());
            new_nodes += 1;
        }

        emit_group_children(
            rep,
            group.members.iter().map(|&m| &scored[m]),
            sentences,
            &chunk_texts,
            config,
            ctx,
            batch,
        );
    }
}

/// Attach up to `max_group_children` near-duplicate members below their
/// representative.
fn emit_group_children<'a>(
    rep: &ScoredPhrase,
    members: impl Iterator<Item = &'a ScoredPhrase>,
    sentences: &[Sentence],
    chunk_texts: &[&str],
    config: &PipelineConfig,
    ctx: &mut BuildContext,
    batch: &mut GraphBatch,
) {
    let mut emitted = 0usize;
    for member in members {
        if emitted >= config.max_group_children {
            break;
        }
        if ctx.already_made.contains(&member.phrase) {
            continue;
        }
        batch.push_node(make_node(
            &member.phrase,
            &member.phrase,
            &member.sentence_indices,
            sentences,
            &ctx.source_id,
        ));
        ctx.already_made.insert(member.phrase.clone());
        batch.push_edge(Edge {
            source: ctx.resolve_name(&rep.phrase),
            target: member.phrase.clone(),
            relation: relation_label(
                chunk_texts,
                &rep.phrase,
                &member.phrase,
                config.relation_max_chars,
            )
            .unwrap_or_else(|| "contains".to_string()),
            source_id: ctx.source_id.clone(),
        });
        emitted += 1;
    }
}

/// Map each phrase of the chunk to its containing sentences, phrases in
/// first-occurrence order.
fn collect_phrase_info(
    chunk: &FinalizedChunk,
    sentences: &[Sentence],
) -> Vec<(String, Vec<usize>)> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut info: Vec<(String, Vec<usize>)> = Vec::new();

    for &index in &chunk.sentence_indices {
        for phrase in &sentences[index].tokens {
            if let Some(&at) = positions.get(phrase.as_str()) {
                if !info[at].1.contains(&index) {
                    info[at].1.push(index);
                }
            } else {
                positions.insert(phrase.as_str(), info.len());
                info.push((phrase.clone(), vec![index]));
            }
        }
    }
    info
}

/// Build a concept node with provenance records for this chunk.
fn make_node(
    name: &str,
    phrase: &str,
    indices: &[usize],
    sentences: &[Sentence],
    source_id: &str,
) -> KeywordNode {
    let texts: Vec<&str> = indices.iter().map(|&i| sentences[i].text.as_str()).collect();
    let description = texts
        .iter()
        .min_by_key(|t| t.chars().count())
        .copied()
        .unwrap_or(phrase)
        .to_string();

    let mut node = KeywordNode::bare(name, source_id);
    node.descriptions.push(SourceRecord {
        data: description,
        source_id: source_id.to_string(),
        sentence_indices: indices.to_vec(),
    });
    node.original_sentences.push(SourceRecord {
        data: texts.join(" "),
        source_id: source_id.to_string(),
        sentence_indices: indices.to_vec(),
    });
    node
}
