mod common;
use common::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use treescope_lib::counters::{time_summary, CounterRecord, CounterStore, LinkType, UnresolvedReason};
use treescope_lib::counters::summary::{Direction, Statistic};

fn record(node_id: &str, port_idx: usize, rcv_data: f64) -> CounterRecord
{
    CounterRecord { node_id: node_id.to_string(), port_idx, rcv_data }
}

#[test]
fn reset_is_clamped()
{
    let topology = fat_tree();
    let mut store = CounterStore::new();
    for (minute, value) in [(0, 100.0), (1, 150.0), (2, 90.0)]
    {
        store.insert(timestamp(minute), vec![record(&leaf_id(0, 0), 3, value)]);
    }
    let counters = store.fix();
    let deltas: Vec<f64> = counters.tables_in(None).map(|(_, records)| records[0].rcv_data).collect();
    assert_eq!(deltas, vec![0.0, 50.0, 0.0]);
    let aggregation = counters.aggregate(&topology, None);
    assert_eq!(aggregation.links.len(), 1);
    assert_eq!(aggregation.total(), 50.0);
    assert_eq!(aggregation.links[0].link_type, LinkType::Up);
    assert_eq!(aggregation.links[0].nodeto.id(), spine_id(0, 0));
}

#[test]
fn random_sequences()
{
    let topology = fat_tree();
    let mut rng = StdRng::seed_from_u64(10u64);
    for _ in 0..20
    {
        let length = rng.gen_range(2..12);
        let mut raw = vec![];
        let mut value: u64 = rng.gen_range(0..1000);
        let monotone = rng.gen_bool(0.5);
        for _ in 0..length
        {
            if !monotone && rng.gen_bool(0.2)
            {
                value = rng.gen_range(0..value + 1);
            }
            else
            {
                value += rng.gen_range(0..500);
            }
            raw.push(value as f64);
        }
        let mut store = CounterStore::new();
        for (minute, value) in raw.iter().enumerate()
        {
            store.insert(timestamp(minute as u32), vec![record(&spine_id(1, 0), 3, *value)]);
        }
        let counters = store.fix();
        for (_, records) in counters.tables_in(None)
        {
            assert!(records[0].rcv_data >= 0.0);
        }
        let all = counters.aggregate(&topology, None);
        let range = counters.range().expect("some timestamps");
        let full = counters.aggregate(&topology, Some(range));
        assert_eq!(all.num_timestamps, length);
        assert_eq!(all.links.len(), full.links.len());
        assert_eq!(all.total(), full.total());
        if monotone
        {
            let first = rng.gen_range(0..length - 1);
            let last = rng.gen_range(first + 1..length);
            let partial = counters.aggregate(&topology, Some((timestamp(first as u32 + 1), timestamp(last as u32))));
            assert_eq!(partial.total(), raw[last] - raw[first]);
            assert_eq!(all.total(), raw[length - 1] - raw[0]);
        }
    }
}

#[test]
fn aggregation_is_sorted_and_summarized()
{
    let topology = fat_tree();
    let mut store = CounterStore::new();
    let mut text = uniform_counters(10.0);
    text.push_str("ghost,1,5,0\nnode0,9,5,0\n");
    store.load(timestamp(0), uniform_counters(10.0).as_bytes()).expect("valid counters");
    store.load(timestamp(1), uniform_counters(30.0).as_bytes()).expect("valid counters");
    let counters = store.fix();
    let aggregation = counters.aggregate(&topology, None);
    assert_eq!(aggregation.unresolved.len(), 0);
    let mut with_ghosts = CounterStore::new();
    with_ghosts.load(timestamp(0), text.as_bytes()).expect("valid counters");
    let ghosts = with_ghosts.fix().aggregate(&topology, None);
    assert_eq!(ghosts.unresolved.len(), 2);
    assert!(ghosts.unresolved.iter().any(|u| u.node_id == "ghost" && u.reason == UnresolvedReason::UnknownSource));
    assert!(ghosts.unresolved.iter().any(|u| u.node_id == "node0" && u.reason == UnresolvedReason::MissingPort));

    // Every port of the tree is a link.
    let ports: usize = topology.nodes().map(|n| n.ports.len()).sum::<usize>() + topology.switches().map(|s| s.ports.len()).sum::<usize>();
    assert_eq!(aggregation.links.len(), ports);
    assert!(aggregation.links.iter().all(|link| link.rcv_data == 20.0));
    let types: Vec<LinkType> = aggregation.links.iter().map(|link| link.link_type).collect();
    let mut sorted = types.clone();
    sorted.sort();
    assert_eq!(types, sorted);
    assert_eq!(types.first(), Some(&LinkType::Down));
    assert_eq!(types.last(), Some(&LinkType::Up));

    let levels: Vec<u8> = aggregation.switches.iter().map(|s| s.node.level()).collect();
    let mut sorted_levels = levels.clone();
    sorted_levels.sort();
    assert_eq!(levels, sorted_levels);
    assert_eq!(aggregation.switches.len(), num_nodes() + topology.switches().count());
    let spine = aggregation.switches.iter().find(|s| s.node.id() == spine_id(0, 1)).expect("spine present");
    assert_eq!(spine.out_data.values.len(), 3);
    assert_eq!(spine.in_data.values.len(), 3);
    assert_eq!(spine.out_data.max, 20.0);
}

#[test]
fn summary_by_level()
{
    let topology = fat_tree();
    let mut store = CounterStore::new();
    store.insert(timestamp(0), vec![record(&leaf_id(0, 0), 1, 0.0), record(&leaf_id(0, 0), 3, 0.0)]);
    store.insert(timestamp(1), vec![record(&leaf_id(0, 0), 1, 40.0), record(&leaf_id(0, 0), 3, 10.0)]);
    store.insert(timestamp(2), vec![record(&leaf_id(0, 0), 1, 40.0)]);
    let counters = store.fix();
    let summary = time_summary(&counters, &topology);
    assert_eq!(summary.timestamps.len(), 3);
    assert_eq!(summary.series.len(), 24);
    let down = summary.series(Statistic::Max, Some(0), Direction::Down).expect("series");
    assert_eq!(down.values, vec![Some(0.0), Some(40.0), Some(0.0)]);
    let up = summary.series(Statistic::Max, Some(1), Direction::Up).expect("series");
    assert_eq!(up.values, vec![Some(0.0), Some(10.0), None]);
    let mean = summary.series(Statistic::Mean, None, Direction::Both).expect("series");
    assert_eq!(mean.values, vec![Some(0.0), Some(25.0), Some(0.0)]);
    let empty = summary.series(Statistic::Max, Some(2), Direction::Both).expect("series");
    assert!(empty.values.iter().all(|v| v.is_none()));
}
