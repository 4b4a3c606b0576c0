//! Graphviz export of the supertile connectivity discovered during a run.

use alttp::room::SharedRoom;
use failure::Error;
use std::borrow::Cow;
use std::fs::File;
use std::path::Path;

type Nd = u16;
type Ed = (u16, u16);

struct Edges {
    edges: Vec<Ed>,
}

impl<'a> dot::Labeller<'a, Nd, Ed> for Edges {
    fn graph_id(&'a self) -> dot::Id<'a> {
        dot::Id::new("alttp").unwrap()
    }

    fn node_id(&'a self, n: &Nd) -> dot::Id<'a> {
        dot::Id::new(format!("room_{:03x}", *n)).unwrap()
    }

    fn node_label(&'a self, n: &Nd) -> dot::LabelText<'a> {
        dot::LabelText::label(format!("${:03X}", *n))
    }
}

impl<'a> dot::GraphWalk<'a, Nd, Ed> for Edges {
    fn nodes(&self) -> dot::Nodes<'a, Nd> {
        let mut nodes = Vec::with_capacity(self.edges.len() * 2);
        for &(s, t) in &self.edges {
            nodes.push(s);
            nodes.push(t);
        }
        nodes.sort();
        nodes.dedup();
        Cow::Owned(nodes)
    }

    fn edges(&'a self) -> dot::Edges<'a, Ed> {
        Cow::Borrowed(&self.edges[..])
    }

    fn source(&self, e: &Ed) -> Nd {
        e.0
    }

    fn target(&self, e: &Ed) -> Nd {
        e.1
    }
}

/// Stair, warp and edge-door connectivity of every loaded room.
fn collect_edges(rooms: &[SharedRoom]) -> Vec<Ed> {
    let mut edges = Vec::new();
    for room in rooms {
        let r = room.lock();
        if !r.is_loaded {
            continue;
        }
        let st = r.supertile;
        for &target in &r.stair_exit_to {
            if target.0 != 0 {
                edges.push((st.0, target.0));
            }
        }
        if r.warp_exit_to.0 != 0 {
            edges.push((st.0, r.warp_exit_to.0));
        }
        for door in &r.doors {
            if door.is_edge() && door.kind.is_edge_doorway_to_neighbor() {
                if let Some(n) = st.move_by(door.dir) {
                    edges.push((st.0, n.0));
                }
            }
        }
    }
    edges.sort();
    edges.dedup();
    edges
}

pub fn write_rooms_dot(rooms: &[SharedRoom], path: &Path) -> Result<(), Error> {
    let edges = Edges {
        edges: collect_edges(rooms),
    };
    let mut f = File::create(path)?;
    dot::render(&edges, &mut f)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alttp::room::{Room, RoomCache};
    use alttp::Supertile;

    #[test]
    fn edges_from_stairs_and_warps() {
        let cache = RoomCache::new();
        cache.get_or_create_with(Supertile(0x012), || {
            let mut room = Room::new(Supertile(0x012), 0);
            room.stair_exit_to[0] = Supertile(0x022);
            room.warp_exit_to = Supertile(0x032);
            room
        });
        let edges = collect_edges(&cache.all());
        assert!(edges.contains(&(0x012, 0x022)));
        assert!(edges.contains(&(0x012, 0x032)));
    }
}
