//! msgstore channel - reconcile a channel's paging window

use clap::Args;
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit};
use crate::core::{ChannelId, ReferenceInfo};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct ChannelArgs {
    /// Channel id
    pub channel_id: ChannelId,

    /// Number of references the channel keeps in memory
    #[arg(long)]
    pub full_size: usize,

    /// Print every in-memory reference
    #[arg(long)]
    pub list: bool,
}

#[derive(Serialize)]
struct ChannelReport {
    channel_id: ChannelId,
    full_size: usize,
    in_memory: usize,
    min_page_ordering: Option<i64>,
    max_page_ordering: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refs: Option<Vec<ReferenceInfo>>,
}

pub fn run(ctx: &AppContext, args: &ChannelArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let loaded = store
        .paging()
        .get_initial_reference_infos(args.channel_id, args.full_size)?;

    let report = ChannelReport {
        channel_id: args.channel_id,
        full_size: args.full_size,
        in_memory: loaded.refs.len(),
        min_page_ordering: loaded.min_page_ordering(),
        max_page_ordering: loaded.max_page_ordering(),
        refs: args.list.then(|| loaded.refs.clone()),
    };
    if ctx.quiet && !ctx.machine_mode() {
        return Ok(());
    }

    emit(ctx.output_format, &report, |report| {
        let mut layout = HumanLayout::new();
        layout
            .title(&format!("Channel {}", report.channel_id))
            .kv("full size", report.full_size)
            .kv("in memory", report.in_memory);
        match (report.min_page_ordering, report.max_page_ordering) {
            (Some(min), Some(max)) => layout.kv("paged", format!("{min}..={max}")),
            _ => layout.kv("paged", "none"),
        };
        if let Some(refs) = &report.refs {
            layout.blank().section("References");
            for info in refs {
                layout.bullet(&format!(
                    "message {}  deliveries {}  {}",
                    info.message_id,
                    info.delivery_count,
                    if info.reliable { "reliable" } else { "unreliable" }
                ));
            }
        }
        layout
    })
}
