//! Grid coordinates and links

use serde::{Deserialize, Serialize};

/// Position of a node in the grid; `(0, 0)` is the host-facing corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeCoord {
    /// Column
    pub x: u16,
    /// Row; row 0 receives broadcasts from the host
    pub y: u16,
}

impl NodeCoord {
    pub fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for NodeCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Link a message enters or leaves a node through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Port {
    North,
    South,
    East,
    West,
    /// Self-addressed activation
    Local,
    /// Host link (only row 0 and the reduction root use it)
    Host,
}

impl Port {
    /// Every port, in inbox order
    pub const ALL: [Port; 6] = [
        Port::North,
        Port::South,
        Port::East,
        Port::West,
        Port::Local,
        Port::Host,
    ];

    /// Inbox slot
    pub fn index(&self) -> usize {
        match self {
            Port::North => 0,
            Port::South => 1,
            Port::East => 2,
            Port::West => 3,
            Port::Local => 4,
            Port::Host => 5,
        }
    }

    /// Port the message arrives on at the neighbour
    pub fn opposite(&self) -> Port {
        match self {
            Port::North => Port::South,
            Port::South => Port::North,
            Port::East => Port::West,
            Port::West => Port::East,
            Port::Local => Port::Local,
            Port::Host => Port::Host,
        }
    }
}

/// Dimensions of the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridShape {
    pub width: u16,
    pub height: u16,
}

impl GridShape {
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        usize::from(self.width) * usize::from(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, coord: NodeCoord) -> bool {
        coord.x < self.width && coord.y < self.height
    }

    /// Row-major slot of `coord`
    pub fn index(&self, coord: NodeCoord) -> usize {
        usize::from(coord.y) * usize::from(self.width) + usize::from(coord.x)
    }

    /// Row-major coordinates
    pub fn coords(&self) -> impl Iterator<Item = NodeCoord> {
        let (w, h) = (self.width, self.height);
        (0..h).flat_map(move |y| (0..w).map(move |x| NodeCoord::new(x, y)))
    }

    /// Neighbour across `port`, if it exists
    pub fn neighbor(&self, coord: NodeCoord, port: Port) -> Option<NodeCoord> {
        let next = match port {
            Port::North => NodeCoord::new(coord.x, coord.y.checked_sub(1)?),
            Port::South => NodeCoord::new(coord.x, coord.y.checked_add(1)?),
            Port::East => NodeCoord::new(coord.x.checked_add(1)?, coord.y),
            Port::West => NodeCoord::new(coord.x.checked_sub(1)?, coord.y),
            Port::Local | Port::Host => return None,
        };
        self.contains(next).then_some(next)
    }

    /// Shortest path from the root `(0, 0)` to `target`: east along row 0,
    /// then south along the target column. Each entry is a node and the port
    /// it forwards through; the target itself is not included.
    pub fn route_from_root(&self, target: NodeCoord) -> Vec<(NodeCoord, Port)> {
        let mut hops = Vec::new();
        for x in 0..target.x {
            hops.push((NodeCoord::new(x, 0), Port::East));
        }
        for y in 0..target.y {
            hops.push((NodeCoord::new(target.x, y), Port::South));
        }
        hops
    }

    /// Where a node sends its merged reduction partial: west along the row,
    /// then north up column 0, then to the host from the root.
    pub fn reduction_port(&self, coord: NodeCoord) -> Port {
        if coord.x > 0 {
            Port::West
        } else if coord.y > 0 {
            Port::North
        } else {
            Port::Host
        }
    }

    /// Upstream partials a node waits for before forwarding its own
    pub fn reduction_inputs(&self, coord: NodeCoord) -> usize {
        let from_east = usize::from(coord.x + 1 < self.width);
        let from_south = usize::from(coord.x == 0 && coord.y + 1 < self.height);
        from_east + from_south
    }
}
