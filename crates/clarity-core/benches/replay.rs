//! Replay throughput over synthetic outlines.

use chrono::{Duration, TimeZone, Utc};
use clarity_core::event::{EventDraft, EventType};
use clarity_core::log::Located;
use clarity_core::rank;
use clarity_core::replay::replay;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::{Value, json};

const TIERS: [(&str, usize); 3] = [("small", 100), ("medium", 1_000), ("large", 10_000)];

fn located(seq: u64, ty: EventType, id: &str, payload: &Value) -> anyhow::Result<Located> {
    let base = Utc
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| anyhow::anyhow!("bad base timestamp"))?;
    let at = base + Duration::milliseconds(i64::try_from(seq)?);
    let envelope = EventDraft::new(ty, id, "act-bench", payload)?
        .issued_at(at)
        .seal("ws-bench", "rep-bench", 1, Vec::new())?;
    Ok(Located {
        envelope,
        path: "events/events.rep-bench.jsonl".into(),
        line: usize::try_from(seq)?,
    })
}

/// One outline with `items` items, each retitled and moved once.
fn corpus(items: usize) -> anyhow::Result<Vec<Located>> {
    let mut out = Vec::with_capacity(items * 3 + 3);
    let mut seq = 0_u64;
    let mut push = |ty: EventType, id: &str, payload: Value| -> anyhow::Result<()> {
        seq += 1;
        out.push(located(seq, ty, id, &payload)?);
        Ok(())
    };
    push(EventType::IdentityCreate, "act-bench", json!({"kind": "human", "name": "Bench"}))?;
    push(EventType::ProjectCreate, "proj-1", json!({"name": "Bench"}))?;
    push(EventType::OutlineCreate, "out-1", json!({"projectId": "proj-1"}))?;

    let mut last = rank::initial();
    for i in 0..items {
        let id = format!("item-{i}");
        push(
            EventType::ItemCreate,
            &id,
            json!({"projectId": "proj-1", "outlineId": "out-1", "rank": last, "title": id}),
        )?;
        last = rank::after(&last)?;
    }
    for i in 0..items {
        let id = format!("item-{i}");
        push(EventType::ItemSetTitle, &id, json!({"title": format!("renamed {i}")}))?;
        push(EventType::ItemMove, &id, json!({"before": "item-0"}))?;
    }
    Ok(out)
}

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");
    for (name, items) in TIERS {
        let Ok(events) = corpus(items) else {
            eprintln!("skipping tier {name}: corpus generation failed");
            continue;
        };
        group.throughput(Throughput::Elements(events.len() as u64));
        group.bench_with_input(BenchmarkId::new("full", name), &events, |b, events| {
            b.iter(|| black_box(replay(events)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_replay);
criterion_main!(benches);
