//! Domain descriptors.
//!
//! One generic engine serves every node-type pairing. A [`DomainDescriptor`]
//! captures what differs between them:
//!
//! - the iteration domain (upper triangle of a square mesh, or the full
//!   rectangle of a bipartite relation)
//! - how matrix indices map to nodes of each class, including the global
//!   numbering used for management addresses
//! - interface naming, delay scaling and the link address partition

use std::net::Ipv4Addr;

use crate::address::{AddressSpace, AllocationScheme};
use crate::error::{Result, TopologyError};
use crate::matrix::{Cell, VisibilityMatrix};

/// Which cells of a matrix participate in diffing and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IterationDomain {
    /// Cells with `col > row` of a square matrix (symmetric peer mesh).
    UpperTriangle,
    /// Every cell (directed or bipartite relation).
    Full,
}

impl IterationDomain {
    /// Cells of a `rows x cols` matrix in row-major order.
    pub fn cells(self, rows: usize, cols: usize) -> impl Iterator<Item = Cell> {
        (0..rows).flat_map(move |row| {
            let start = match self {
                IterationDomain::UpperTriangle => row + 1,
                IterationDomain::Full => 0,
            };
            (start..cols).map(move |col| Cell::new(row, col))
        })
    }

    /// Number of cells in the domain.
    pub fn capacity(self, rows: usize, cols: usize) -> usize {
        match self {
            IterationDomain::UpperTriangle => rows * rows.saturating_sub(1) / 2,
            IterationDomain::Full => rows * cols,
        }
    }

    /// Verify a matrix shape is usable with this domain.
    pub fn check(self, rows: usize, cols: usize) -> Result<()> {
        match self {
            IterationDomain::UpperTriangle if rows != cols => {
                Err(TopologyError::NotSquare { rows, cols })
            }
            _ => Ok(()),
        }
    }
}

/// The closed set of node kinds in the emulated constellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeClass {
    /// Core relay satellites that aggregate access for edge members.
    Relay,
    /// Edge members of the sensing group.
    Sensing,
    /// Edge members of the constellation mesh.
    Constellation,
}

impl NodeClass {
    /// Lower-case label used in interface and host names.
    pub const fn label(self) -> &'static str {
        match self {
            NodeClass::Relay => "tsn",
            NodeClass::Sensing => "yg",
            NodeClass::Constellation => "xw",
        }
    }
}

/// A concrete node resolved from a matrix index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeRef {
    pub class: NodeClass,
    /// 1-based position within its class.
    pub ordinal: u32,
    /// 0-based index along the matrix axis it was resolved from.
    pub index: usize,
    /// 1-based number across all classes, used for management addressing.
    pub global: u32,
}

impl NodeRef {
    /// Host-style name, e.g. `xw7`.
    pub fn name(&self) -> String {
        format!("{}{}", self.class.label(), self.ordinal)
    }
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.class.label().to_uppercase(), self.ordinal)
    }
}

/// A run of consecutive matrix indices that belong to one class.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeGroup {
    pub class: NodeClass,
    pub count: usize,
    /// Added to the ordinal to get the node's global number.
    pub global_offset: u32,
}

/// Index-to-node mapping for one matrix dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Axis {
    groups: Vec<NodeGroup>,
}

impl Axis {
    pub fn new(groups: Vec<NodeGroup>) -> Self {
        Self { groups }
    }

    /// An axis holding a single class.
    pub fn single(class: NodeClass, count: usize, global_offset: u32) -> Self {
        Self::new(vec![NodeGroup {
            class,
            count,
            global_offset,
        }])
    }

    pub fn groups(&self) -> &[NodeGroup] {
        &self.groups
    }

    /// Total number of indices covered.
    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve a 0-based index to its node.
    pub fn resolve(&self, index: usize) -> Option<NodeRef> {
        let mut start = 0;
        for group in &self.groups {
            if index < start + group.count {
                let ordinal = (index - start + 1) as u32;
                return Some(NodeRef {
                    class: group.class,
                    ordinal,
                    index,
                    global: group.global_offset + ordinal,
                });
            }
            start += group.count;
        }
        None
    }
}

/// Rule for naming the two interface ends of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InterfaceNaming {
    /// `<ordinal>-<ordinal>`, for single-class meshes.
    Bare,
    /// `<class><ordinal>-<class><ordinal>`, e.g. `tsn1-yg2`.
    Labelled,
}

impl InterfaceNaming {
    /// Interface names `(on a, on b)` for a link between `a` and `b`.
    pub fn names(self, a: &NodeRef, b: &NodeRef) -> (String, String) {
        match self {
            InterfaceNaming::Bare => (
                format!("{}-{}", a.ordinal, b.ordinal),
                format!("{}-{}", b.ordinal, a.ordinal),
            ),
            InterfaceNaming::Labelled => (
                format!("{}-{}", a.name(), b.name()),
                format!("{}-{}", b.name(), a.name()),
            ),
        }
    }
}

/// Conversion from matrix cell value to link delay in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DelayScale {
    /// Cell value is already in milliseconds.
    Identity,
    /// `floor(value / divisor)`.
    FloorDiv(f64),
}

impl DelayScale {
    pub fn delay_ms(self, value: f64) -> f64 {
        match self {
            DelayScale::Identity => value,
            DelayScale::FloorDiv(divisor) => (value / divisor).floor(),
        }
    }
}

/// Management address layout: `base + (global - 1) * stride + host`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ManagementPlan {
    pub base: Ipv4Addr,
    pub stride: u32,
    pub host: u32,
}

impl Default for ManagementPlan {
    fn default() -> Self {
        Self {
            base: Ipv4Addr::new(10, 0, 64, 0),
            stride: 4,
            host: 2,
        }
    }
}

impl ManagementPlan {
    /// Management address of a node.
    pub fn address(&self, node: &NodeRef) -> Ipv4Addr {
        self.address_of(node.global)
    }

    /// Management address for a global number (1-based).
    pub fn address_of(&self, global: u32) -> Ipv4Addr {
        let offset = global.saturating_sub(1) * self.stride + self.host;
        Ipv4Addr::from(u32::from(self.base) + offset)
    }

    /// Inverse of [`address_of`](Self::address_of).
    ///
    /// `None` for addresses that do not sit on a host position of the plan.
    pub fn number_of(&self, addr: Ipv4Addr) -> Option<u32> {
        let delta = u32::from(addr).checked_sub(u32::from(self.base) + self.host)?;
        if self.stride == 0 || delta % self.stride != 0 {
            return None;
        }
        Some(delta / self.stride + 1)
    }
}

/// One visible neighbor entry of a domain table.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Neighbor {
    pub node: NodeRef,
    pub address: Ipv4Addr,
    /// Raw cell value linking the row node to this neighbor.
    pub weight: f64,
}

/// The currently visible neighbors of one row node.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DomainTable {
    pub node: NodeRef,
    pub address: Ipv4Addr,
    pub visible: Vec<Neighbor>,
}

/// Everything that distinguishes one node-type pairing from another.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DomainDescriptor {
    pub name: String,
    pub shape: IterationDomain,
    pub rows: Axis,
    pub cols: Axis,
    /// Whether allocation keys ignore endpoint order.
    pub symmetric: bool,
    pub naming: InterfaceNaming,
    pub delay: DelayScale,
    pub link_space: AddressSpace,
    pub management: ManagementPlan,
}

/// Delay divisor applied to constellation mesh cell values.
pub const MESH_DELAY_DIVISOR: f64 = 300.0;

impl DomainDescriptor {
    /// Square peer mesh among `nodes` constellation members.
    ///
    /// `global_offset` positions the mesh in the management numbering
    /// (the number of relay and sensing nodes that precede it).
    pub fn constellation_mesh(nodes: usize, global_offset: u32) -> Self {
        let axis = Axis::single(NodeClass::Constellation, nodes, global_offset);
        Self {
            name: "constellation-mesh".to_string(),
            shape: IterationDomain::UpperTriangle,
            rows: axis.clone(),
            cols: axis,
            symmetric: true,
            naming: InterfaceNaming::Bare,
            delay: DelayScale::FloorDiv(MESH_DELAY_DIVISOR),
            link_space: AddressSpace::new(
                Ipv4Addr::new(10, 0, 16, 0),
                Ipv4Addr::new(10, 0, 64, 0),
                nodes as u32,
            ),
            management: ManagementPlan::default(),
        }
    }

    /// Relays to (sensing ∪ constellation) access relation.
    ///
    /// Columns hold the `sensing` members first, then `constellation`.
    pub fn relay_access(relays: usize, sensing: usize, constellation: usize) -> Self {
        let cols = Axis::new(vec![
            NodeGroup {
                class: NodeClass::Sensing,
                count: sensing,
                global_offset: relays as u32,
            },
            NodeGroup {
                class: NodeClass::Constellation,
                count: constellation,
                global_offset: (relays + sensing) as u32,
            },
        ]);
        Self {
            name: "relay-access".to_string(),
            shape: IterationDomain::Full,
            rows: Axis::single(NodeClass::Relay, relays, 0),
            cols,
            symmetric: false,
            naming: InterfaceNaming::Labelled,
            delay: DelayScale::Identity,
            link_space: AddressSpace::new(
                Ipv4Addr::new(10, 0, 0, 0),
                Ipv4Addr::new(10, 0, 16, 0),
                (sensing + constellation) as u32,
            ),
            management: ManagementPlan::default(),
        }
    }

    /// Switch the allocation scheme of the link partition.
    pub fn with_scheme(mut self, scheme: AllocationScheme) -> Self {
        self.link_space.scheme = scheme;
        self
    }

    /// Verify a matrix fits this descriptor.
    pub fn check(&self, matrix: &VisibilityMatrix) -> Result<()> {
        let (rows, cols) = matrix.dims();
        self.shape.check(rows, cols)?;
        if rows > self.rows.len() {
            return Err(TopologyError::UnknownNode {
                axis: "row",
                index: rows - 1,
            });
        }
        if cols > self.cols.len() {
            return Err(TopologyError::UnknownNode {
                axis: "column",
                index: cols - 1,
            });
        }
        Ok(())
    }

    /// The row node of a matrix row.
    pub fn row_node(&self, row: usize) -> Result<NodeRef> {
        self.rows
            .resolve(row)
            .ok_or(TopologyError::UnknownNode { axis: "row", index: row })
    }

    /// The column node of a matrix column.
    pub fn col_node(&self, col: usize) -> Result<NodeRef> {
        self.cols
            .resolve(col)
            .ok_or(TopologyError::UnknownNode { axis: "column", index: col })
    }

    /// Both endpoints of the link at `cell`.
    pub fn endpoints(&self, cell: Cell) -> Result<(NodeRef, NodeRef)> {
        Ok((self.row_node(cell.row)?, self.col_node(cell.col)?))
    }

    /// 1-based allocation ordinals for a cell.
    ///
    /// These follow matrix position, not class ordinals, so a relay's
    /// columns are numbered across every edge group.
    pub fn pair_ordinals(cell: Cell) -> (u32, u32) {
        (cell.row as u32 + 1, cell.col as u32 + 1)
    }

    /// Interface names for the link at `a <-> b`.
    pub fn interface_names(&self, a: &NodeRef, b: &NodeRef) -> (String, String) {
        self.naming.names(a, b)
    }

    /// Link delay for a cell value.
    pub fn delay_ms(&self, value: f64) -> f64 {
        self.delay.delay_ms(value)
    }

    /// Visible neighbors of a row node in `matrix`, in column order.
    ///
    /// The diagonal is skipped for meshes.
    pub fn neighbors(&self, matrix: &VisibilityMatrix, row: usize) -> Result<Vec<Neighbor>> {
        matrix
            .visible_in_row(row)
            .filter(|&(col, _)| !(self.shape == IterationDomain::UpperTriangle && col == row))
            .map(|(col, weight)| {
                let node = self.col_node(col)?;
                Ok(Neighbor {
                    node,
                    address: self.management.address(&node),
                    weight,
                })
            })
            .collect()
    }

    /// One [`DomainTable`] per row of `matrix`.
    pub fn domain_tables(&self, matrix: &VisibilityMatrix) -> Result<Vec<DomainTable>> {
        self.check(matrix)?;
        (0..matrix.rows())
            .map(|row| {
                let node = self.row_node(row)?;
                Ok(DomainTable {
                    node,
                    address: self.management.address(&node),
                    visible: self.neighbors(matrix, row)?,
                })
            })
            .collect()
    }

    /// Active link count and capacity of `matrix` under this descriptor.
    pub fn status(&self, matrix: &VisibilityMatrix) -> TopologyStatus {
        let (rows, cols) = matrix.dims();
        let active_links = self
            .shape
            .cells(rows, cols)
            .filter(|&cell| matrix.has_link(cell))
            .count();
        TopologyStatus {
            rows,
            cols,
            active_links,
            capacity: self.shape.capacity(rows, cols),
        }
    }
}

/// Summary of an applied topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TopologyStatus {
    pub rows: usize,
    pub cols: usize,
    pub active_links: usize,
    pub capacity: usize,
}

impl std::fmt::Display for TopologyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} nodes, {} active links of {} possible",
            self.rows, self.cols, self.active_links, self.capacity
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upper_triangle_cells() {
        let cells: Vec<_> = IterationDomain::UpperTriangle.cells(3, 3).collect();
        assert_eq!(
            cells,
            vec![Cell::new(0, 1), Cell::new(0, 2), Cell::new(1, 2)]
        );
        assert_eq!(IterationDomain::UpperTriangle.capacity(3, 3), 3);
    }

    #[test]
    fn full_cells_cover_rectangle() {
        let cells: Vec<_> = IterationDomain::Full.cells(2, 3).collect();
        assert_eq!(cells.len(), 6);
        assert_eq!(cells[0], Cell::new(0, 0));
        assert_eq!(cells[5], Cell::new(1, 2));
        assert_eq!(IterationDomain::Full.capacity(2, 3), 6);
    }

    #[test]
    fn upper_triangle_requires_square() {
        assert_eq!(
            IterationDomain::UpperTriangle.check(2, 3),
            Err(TopologyError::NotSquare { rows: 2, cols: 3 })
        );
        assert!(IterationDomain::Full.check(2, 3).is_ok());
    }

    #[test]
    fn axis_resolves_across_groups() {
        let d = DomainDescriptor::relay_access(8, 12, 46);
        let yg3 = d.col_node(2).unwrap();
        assert_eq!(yg3.class, NodeClass::Sensing);
        assert_eq!(yg3.ordinal, 3);
        assert_eq!(yg3.global, 11);

        let xw1 = d.col_node(12).unwrap();
        assert_eq!(xw1.class, NodeClass::Constellation);
        assert_eq!(xw1.ordinal, 1);
        assert_eq!(xw1.global, 21);
        assert_eq!(xw1.to_string(), "XW1");

        assert!(d.col_node(58).is_err());
    }

    #[test]
    fn interface_naming_rules() {
        let access = DomainDescriptor::relay_access(8, 12, 46);
        let (tsn, yg) = access.endpoints(Cell::new(0, 1)).unwrap();
        assert_eq!(
            access.interface_names(&tsn, &yg),
            ("tsn1-yg2".to_string(), "yg2-tsn1".to_string())
        );

        let mesh = DomainDescriptor::constellation_mesh(66, 20);
        let (a, b) = mesh.endpoints(Cell::new(2, 9)).unwrap();
        assert_eq!(
            mesh.interface_names(&a, &b),
            ("3-10".to_string(), "10-3".to_string())
        );
    }

    #[test]
    fn delay_scaling() {
        let mesh = DomainDescriptor::constellation_mesh(4, 20);
        assert_eq!(mesh.delay_ms(1799.0), 5.0);
        let access = DomainDescriptor::relay_access(1, 1, 1);
        assert_eq!(access.delay_ms(3.5), 3.5);
    }

    #[test]
    fn management_plan_round_trips_numbers() {
        let plan = ManagementPlan::default();
        assert_eq!(plan.address_of(1), Ipv4Addr::new(10, 0, 64, 2));
        assert_eq!(plan.address_of(31), Ipv4Addr::new(10, 0, 64, 122));
        assert_eq!(plan.number_of(Ipv4Addr::new(10, 0, 64, 122)), Some(31));
        assert_eq!(plan.number_of(Ipv4Addr::new(10, 0, 64, 3)), None);
        assert_eq!(plan.number_of(Ipv4Addr::new(10, 0, 63, 250)), None);
    }

    #[test]
    fn neighbors_skip_mesh_diagonal() {
        let mesh = DomainDescriptor::constellation_mesh(3, 20);
        let m = VisibilityMatrix::from_rows(vec![
            vec![0.0, 5.0, -1.0],
            vec![5.0, 0.0, 2.0],
            vec![-1.0, 2.0, 0.0],
        ])
        .unwrap();
        let n = mesh.neighbors(&m, 1).unwrap();
        let ordinals: Vec<_> = n.iter().map(|x| x.node.ordinal).collect();
        assert_eq!(ordinals, vec![1, 3]);
        assert_eq!(n[0].address, Ipv4Addr::new(10, 0, 64, 82));
    }

    #[test]
    fn domain_tables_list_visible_edges() {
        let d = DomainDescriptor::relay_access(2, 1, 1);
        let m = VisibilityMatrix::from_rows(vec![vec![3.0, -1.0], vec![-1.0, -1.0]]).unwrap();
        let tables = d.domain_tables(&m).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].node.to_string(), "TSN1");
        assert_eq!(tables[0].visible.len(), 1);
        assert_eq!(tables[0].visible[0].node.to_string(), "YG1");
        assert!(tables[1].visible.is_empty());
    }

    #[test]
    fn check_rejects_oversized_matrix() {
        let d = DomainDescriptor::relay_access(1, 1, 0);
        let m = VisibilityMatrix::from_rows(vec![vec![1.0, 2.0]]).unwrap();
        assert!(matches!(
            d.check(&m),
            Err(TopologyError::UnknownNode { axis: "column", .. })
        ));
    }

    #[test]
    fn status_counts_domain_cells_only() {
        let mesh = DomainDescriptor::constellation_mesh(3, 20);
        let m = VisibilityMatrix::from_rows(vec![
            vec![0.0, 5.0, -1.0],
            vec![5.0, 0.0, 2.0],
            vec![-1.0, 2.0, 0.0],
        ])
        .unwrap();
        let status = mesh.status(&m);
        assert_eq!(status.active_links, 2);
        assert_eq!(status.capacity, 3);
    }
}
