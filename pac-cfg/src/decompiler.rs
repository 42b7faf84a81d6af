//! Per-file orchestration: blocks, edges, normalization, data analysis and
//! the CFG survey, in their fixed order.

use pac_asm::PacFile;

use crate::analyze::Visitor;
use crate::datablocks::DataBlocks;
use crate::error::GraphError;
use crate::graph::CodeGraph;
use crate::normalize::normalize_entry_points;
use crate::partition::partition_blocks;
use crate::resolve::Resolver;
use crate::tables::FlowTables;

/// Knobs for one decompilation run.
#[derive(Debug, Clone, Copy)]
pub struct DecompilerSettings {
    /// Skip callback edges during traversals.
    pub ignore_callbacks: bool,
    /// Skip special edges during traversals.
    pub ignore_special: bool,
    /// Treat callback receivers as flow truncators and resolve their edges.
    pub include_callbacks: bool,
    /// Warn when reachability queries name offsets that are not block
    /// starts.
    pub warn_imperfect_block_start: bool,
}

impl Default for DecompilerSettings {
    fn default() -> DecompilerSettings {
        DecompilerSettings {
            ignore_callbacks: true,
            ignore_special: true,
            include_callbacks: true,
            warn_imperfect_block_start: false,
        }
    }
}

/// Owned summary of the CFG survey.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CfgSummary {
    /// Number of blocks.
    pub block_count: usize,
    /// Number of edges.
    pub edge_count: usize,
    /// Start offsets of source blocks.
    pub sources: Vec<u32>,
    /// Start offsets of sink blocks.
    pub sinks: Vec<u32>,
    /// Start offsets of isolated blocks.
    pub isolated: Vec<u32>,
    /// Start offsets of the flow roots.
    pub roots: Vec<u32>,
    /// No cycle was found.
    pub is_dag: bool,
    /// Non-trivial SCCs as block-start sets.
    pub cycles: Vec<Vec<u32>>,
    /// Indexes into `cycles` of components entered more than once.
    pub multiple_entry_cycles: Vec<usize>,
    /// `|E| - |V| + 2`.
    pub cyclomatic: i64,
    /// `|E| - |V| + 1 + |roots|`.
    pub cyclomatic_with_roots: i64,
}

/// Everything one decompiled file yields.
#[derive(Debug, Clone)]
pub struct Decompilation {
    /// The parsed file.
    pub file: PacFile,
    /// The normalized graph; absent when the file held no instructions.
    pub graph: Option<CodeGraph>,
    /// Raw-data blocks with reference analysis applied.
    pub data: DataBlocks,
    /// The CFG survey; absent when there is no graph.
    pub summary: Option<CfgSummary>,
}

impl Decompilation {
    /// A fresh, fully analyzed visitor over the graph.
    pub fn visitor(&self, settings: &DecompilerSettings) -> Option<Visitor<'_>> {
        let graph = self.graph.as_ref()?;
        let mut visitor = Visitor::new(graph);
        visitor.ignore_callbacks = settings.ignore_callbacks;
        visitor.ignore_special = settings.ignore_special;
        visitor.warn_imperfect_block_start = settings.warn_imperfect_block_start;
        visitor.analyze();
        Some(visitor)
    }
}

/// Drives the whole pipeline for one file.
pub struct Decompiler<'t> {
    tables: &'t FlowTables,
    /// Run settings.
    pub settings: DecompilerSettings,
}

fn summarize(visitor: &Visitor<'_>) -> CfgSummary {
    let offsets = |vertices: &[usize]| -> Vec<u32> {
        vertices.iter().map(|&v| visitor.offset_of(v)).collect()
    };
    CfgSummary {
        block_count: visitor.len(),
        edge_count: visitor.edges_count,
        sources: offsets(&visitor.sources),
        sinks: offsets(&visitor.sinks),
        isolated: offsets(&visitor.isolated),
        roots: offsets(&visitor.roots),
        is_dag: visitor.is_dag,
        cycles: visitor
            .non_trivial_components
            .values()
            .map(|members| members.iter().map(|&v| visitor.offset_of(v)).collect())
            .collect(),
        multiple_entry_cycles: visitor.multiple_entry_components.clone(),
        cyclomatic: visitor.cyclomatic(),
        cyclomatic_with_roots: visitor.cyclomatic_with_roots(),
    }
}

impl<'t> Decompiler<'t> {
    /// A decompiler over loaded classification tables.
    pub fn new(tables: &'t FlowTables) -> Decompiler<'t> {
        Decompiler { tables, settings: DecompilerSettings::default() }
    }

    /// Build the intermediate representation: blocks, edges, normalized
    /// entry points.
    pub fn make_ir(&self, file: &PacFile) -> Result<CodeGraph, GraphError> {
        let mut graph = partition_blocks(file, self.tables, self.settings.include_callbacks)?;
        let mut resolver = Resolver::new(&mut graph, file, self.tables);
        resolver.apply_jump_passes();
        resolver.apply_returning();
        if self.settings.include_callbacks {
            resolver.apply_callbacks();
        }
        if let Err(error) = resolver.gate_dataflow() {
            // The pass is advisory; a file with novel gate usage still
            // decompiles without it.
            tracing::warn!("gate dataflow study aborted: {error}");
        }
        normalize_entry_points(&mut graph);
        graph.verify()?;
        Ok(graph)
    }

    /// Decompile one parsed file.
    pub fn decompile(&self, file: PacFile) -> Result<Decompilation, GraphError> {
        let graph = if file.instruction_count() == 0 {
            tracing::debug!(name = file.name(), "no instructions, skipping the CFG");
            None
        } else {
            Some(self.make_ir(&file)?)
        };

        let mut data = DataBlocks::build(&file);
        data.analyze_references(&file);

        let mut decompilation = Decompilation { file, graph, data, summary: None };
        let summary = decompilation.visitor(&self.settings).map(|visitor| summarize(&visitor));
        decompilation.summary = summary;
        Ok(decompilation)
    }
}
