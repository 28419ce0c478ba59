#![allow(dead_code)]
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use treescope_lib::Timestamp;
use treescope_lib::routing::RoutingTable;
use treescope_lib::topology::prelude::*;

pub const PODS: usize = 2;
pub const LEAVES_PER_POD: usize = 2;
pub const NODES_PER_LEAF: usize = 2;
pub const SPINES_PER_POD: usize = 2;
pub const CORES: usize = 2;

pub fn node_index(pod: usize, leaf: usize, k: usize) -> usize
{
    (pod * LEAVES_PER_POD + leaf) * NODES_PER_LEAF + k
}

pub fn node_id(n: usize) -> String { format!("node{}", n) }
pub fn node_name(n: usize) -> String { format!("cab{}", n) }
pub fn node_lid(n: usize) -> Lid { n as Lid + 1 }
pub fn leaf_id(pod: usize, leaf: usize) -> String { format!("l1-{}-{}", pod, leaf) }
pub fn leaf_lid(pod: usize, leaf: usize) -> Lid { 101 + (pod * LEAVES_PER_POD + leaf) as Lid }
pub fn spine_id(pod: usize, j: usize) -> String { format!("l2-{}-{}", pod, j) }
pub fn spine_lid(pod: usize, j: usize) -> Lid { 201 + (pod * SPINES_PER_POD + j) as Lid }
pub fn core_id(j: usize) -> String { format!("l3-{}", j) }
pub fn core_lid(j: usize) -> Lid { 301 + j as Lid }

pub fn num_nodes() -> usize
{
    PODS * LEAVES_PER_POD * NODES_PER_LEAF
}

/// (pod, leaf, k) of the node n.
pub fn node_position(n: usize) -> (usize, usize, usize)
{
    (n / (LEAVES_PER_POD * NODES_PER_LEAF), (n / NODES_PER_LEAF) % LEAVES_PER_POD, n % NODES_PER_LEAF)
}

/// A 3-level fat tree: 2 pods with 2 leaves of 2 nodes and 2 spines each, and 2 cores.
/// Leaves: ports 1,2 to nodes, 3,4 up to the spines. Spines: ports 1,2 down to the leaves, 3 up to its core. Cores: port 1+pod.
pub fn fat_tree_data() -> TopologyData
{
    let mut nodes = vec![];
    let mut switches = vec![];
    for pod in 0..PODS
    {
        for leaf in 0..LEAVES_PER_POD
        {
            let mut ports = vec![];
            for k in 0..NODES_PER_LEAF
            {
                let n = node_index(pod, leaf, k);
                nodes.push(NodeData {
                    id: node_id(n),
                    lid: node_lid(n),
                    desc: format!("{} HCA-1", node_name(n)),
                    ports: vec![Port::to(&leaf_id(pod, leaf), k + 1)],
                });
                ports.push(Port::to(&node_id(n), 1));
            }
            for j in 0..SPINES_PER_POD
            {
                ports.push(Port::to(&spine_id(pod, j), leaf + 1));
            }
            switches.push(SwitchData {
                id: leaf_id(pod, leaf),
                lid: leaf_lid(pod, leaf),
                desc: format!("leaf {}", leaf),
                lvl: 1,
                pod: Some(pod as i64),
                core: None,
                idx: Some(pod * LEAVES_PER_POD + leaf),
                ports,
            });
        }
        for j in 0..SPINES_PER_POD
        {
            let mut ports: Vec<Port> = (0..LEAVES_PER_POD).map(|leaf| Port::to(&leaf_id(pod, leaf), NODES_PER_LEAF + j + 1)).collect();
            ports.push(Port::to(&core_id(j), pod + 1));
            switches.push(SwitchData {
                id: spine_id(pod, j),
                lid: spine_lid(pod, j),
                desc: format!("core{} spine", j),
                lvl: 2,
                pod: Some(pod as i64),
                core: Some(format!("core{}", j)),
                idx: Some(pod * SPINES_PER_POD + j),
                ports,
            });
        }
    }
    for j in 0..CORES
    {
        switches.push(SwitchData {
            id: core_id(j),
            lid: core_lid(j),
            desc: format!("core{} top", j),
            lvl: 3,
            pod: None,
            core: Some(format!("core{}", j)),
            idx: Some(j),
            ports: (0..PODS).map(|pod| Port::to(&spine_id(pod, j), LEAVES_PER_POD + 1)).collect(),
        });
    }
    TopologyData {
        name: "tiny".to_string(),
        num_cores: CORES,
        num_pods: PODS,
        num_l1_l0: NODES_PER_LEAF,
        num_l1_l2: SPINES_PER_POD,
        num_l2_l1: LEAVES_PER_POD,
        num_l2_l3: 1,
        num_l3_l2: PODS,
        nodes,
        switches,
    }
}

pub fn fat_tree() -> Topology
{
    Topology::load(fat_tree_data()).expect("the test fat tree is valid")
}

/// Forwarding tables towards every node, as a routing file.
/// Leaves go up through the spine `n % 2`; spines go up through their only core.
pub fn forwarding_tables() -> String
{
    let mut text = String::from("switch,entries\n");
    let lids = |port_of: &dyn Fn(usize) -> usize| -> String {
        (0..num_nodes()).map(|n| format!("{}:{},", node_lid(n), port_of(n))).collect()
    };
    for pod in 0..PODS
    {
        for leaf in 0..LEAVES_PER_POD
        {
            let row = lids(&|n| {
                let (p, l, k) = node_position(n);
                if p == pod && l == leaf { k + 1 } else { NODES_PER_LEAF + 1 + n % SPINES_PER_POD }
            });
            text.push_str(&format!("{},{}\n", leaf_id(pod, leaf), row));
        }
        for j in 0..SPINES_PER_POD
        {
            let row = lids(&|n| {
                let (p, l, _) = node_position(n);
                if p == pod { l + 1 } else { LEAVES_PER_POD + 1 }
            });
            text.push_str(&format!("{},{}\n", spine_id(pod, j), row));
        }
    }
    for j in 0..CORES
    {
        let row = lids(&|n| node_position(n).0 + 1);
        text.push_str(&format!("{},{}\n", core_id(j), row));
    }
    text
}

pub fn routing_table() -> Arc<RoutingTable>
{
    Arc::new(RoutingTable::parse(forwarding_tables().as_bytes()).expect("the test tables are valid"))
}

pub fn timestamp(minute: u32) -> Timestamp
{
    NaiveDate::from_ymd_opt(2017, 3, 1).and_then(|d| d.and_hms_opt(10, minute, 0)).expect("valid date")
}

pub fn file_stem(minute: u32) -> String
{
    timestamp(minute).format("%Y%m%d-%H%M%S").to_string()
}

/// Counter file where every port of every element received `value`.
pub fn uniform_counters(value: f64) -> String
{
    let topology = fat_tree();
    let mut text = String::from("node_id,port_idx,rcv_data,xmit_data\n");
    for node in topology.nodes()
    {
        text.push_str(&format!("{},1,{},0\n", node.id, value));
    }
    for switch in topology.switches()
    {
        for port in 1..=switch.ports.len()
        {
            text.push_str(&format!("{},{},{},0\n", switch.id, port, value));
        }
    }
    text
}

/// Write a dataset directory with the fat tree and the given files.
pub fn write_dataset(directory: &Path, files: &[(String, String)])
{
    let topology = serde_json::to_string(&fat_tree_data()).expect("serializable topology");
    fs::write(directory.join("network.topo"), topology).expect("writable directory");
    for (name, contents) in files
    {
        let path = directory.join(name);
        if let Some(parent) = path.parent()
        {
            fs::create_dir_all(parent).expect("writable directory");
        }
        fs::write(path, contents).expect("writable directory");
    }
}
