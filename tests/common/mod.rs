// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared fixtures for the end-to-end suites: a scripted ten-page rulebook
//! with three sections, and an orchestrator wired to deterministic
//! in-memory adapters.
#![allow(dead_code)]

use grimoire::adapters::mock::{
    HashEmbedder, MemoryGraphSink, MemoryVectorSink, MockLanguageModel, ScriptedExtractor,
};
use grimoire::adapters::{Adapters, BlockKind, ExtractedBlock};
use grimoire::config::IngestConfig;
use grimoire::runtime::Orchestrator;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub fn block(kind: BlockKind, text: &str) -> ExtractedBlock {
    ExtractedBlock {
        page: 0,
        kind,
        text: text.to_string(),
        bbox: None,
    }
}

fn paragraph(text: &str) -> Vec<ExtractedBlock> {
    vec![block(BlockKind::Paragraph, text)]
}

/// A ten-page rulebook with three sections: Introduction (1-3),
/// Combat (4-7), Spells (8-10). The edited variant rewrites page 5 so
/// only the Combat section's fingerprint changes.
pub fn rulebook_pages(edited_combat: bool) -> Vec<Vec<ExtractedBlock>> {
    let page5 = if edited_combat {
        "Errata: initiative now uses a d20 roll plus Dexterity modifier only."
    } else {
        "Initiative order is rolled once at the start of each encounter."
    };
    vec![
        vec![
            block(BlockKind::Title, "Introduction"),
            block(BlockKind::Paragraph, "Welcome to the Grimoire Primer, a rules compendium."),
        ],
        paragraph("Characters are described by six ability scores."),
        paragraph("The Game Master adjudicates every uncertain outcome."),
        vec![
            block(BlockKind::Title, "Combat"),
            block(BlockKind::Paragraph, "A Mind Flayer wins ties against stunned creatures."),
        ],
        paragraph(page5),
        paragraph("Attacks of opportunity trigger when leaving a threatened square."),
        paragraph("Critical hits double the damage dice, never the modifiers."),
        vec![
            block(BlockKind::Title, "Spells"),
            block(BlockKind::Paragraph, "Spell slots refresh after a long rest."),
        ],
        paragraph("Concentration breaks when the caster takes damage."),
        paragraph("Ritual casting takes ten extra minutes and no slot."),
    ]
}

/// A 500-page rulebook with a title every 25 pages (20 sections), used by
/// the splitting scenario.
pub fn large_rulebook_pages() -> Vec<Vec<ExtractedBlock>> {
    (0..500)
        .map(|i| {
            let page = i + 1;
            let mut blocks = Vec::new();
            if i % 25 == 0 {
                blocks.push(block(BlockKind::Title, &format!("Chapter {}", i / 25 + 1)));
            }
            blocks.push(block(
                BlockKind::Paragraph,
                &format!("Rules text for page {page} of the tome."),
            ));
            blocks
        })
        .collect()
}

/// Everything a scenario needs: the orchestrator plus handles to the
/// scripted extractor and the sinks for post-run assertions.
pub struct Harness {
    pub tmp: tempfile::TempDir,
    pub source: PathBuf,
    pub extractor: Arc<ScriptedExtractor>,
    pub llm: Arc<MockLanguageModel>,
    pub vector_sink: Arc<MemoryVectorSink>,
    pub graph_sink: Arc<MemoryGraphSink>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn artifacts_root(&self) -> PathBuf {
        self.tmp.path().join("artifacts")
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.artifacts_root().join("dev").join(job_id)
    }

    /// Re-script the source document (changed bytes and changed pages).
    pub fn replace_source(&self, bytes: &[u8], pages: Vec<Vec<ExtractedBlock>>) {
        std::fs::write(&self.source, bytes).unwrap();
        self.extractor.register(&self.source, pages);
    }
}

pub fn harness(source_name: &str, bytes: &[u8], pages: Vec<Vec<ExtractedBlock>>) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join(source_name);
    std::fs::write(&source, bytes).unwrap();

    let extractor = Arc::new(ScriptedExtractor::new());
    extractor.register(&source, pages);
    let llm = Arc::new(MockLanguageModel::new());
    let vector_sink = Arc::new(MemoryVectorSink::new());
    let graph_sink = Arc::new(MemoryGraphSink::new());
    let adapters = Adapters {
        extractor: extractor.clone(),
        llm: llm.clone(),
        embedder: Arc::new(HashEmbedder::default()),
        vector_sink: vector_sink.clone(),
        graph_sink: graph_sink.clone(),
    };

    let config = IngestConfig {
        artifacts_root: tmp.path().join("artifacts"),
        worker_slots: 4,
        ..IngestConfig::default()
    };
    let orchestrator = Arc::new(Orchestrator::new(config, adapters).unwrap());

    Harness {
        tmp,
        source,
        extractor,
        llm,
        vector_sink,
        graph_sink,
        orchestrator,
    }
}

/// Convenience: read a pass artifact from a job directory.
pub fn read_artifact(job_dir: &Path, pass_dir: &str, name: &str) -> Vec<u8> {
    std::fs::read(job_dir.join(pass_dir).join(name)).unwrap()
}
