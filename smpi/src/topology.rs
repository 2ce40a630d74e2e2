//! Cartesian process topologies.
use smpi_base::{Error, Rank, Result};

/// Mapping between the ranks of a communicator and points of an
/// N-dimensional grid.
///
/// Ranks are laid out row-major: the last dimension varies fastest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartesianTopology {
    dims: Vec<usize>,
    periodic: Vec<bool>,
    reordered: bool,
}

impl CartesianTopology {
    /// Describe a grid of `dims` over a group of `size` processes.
    ///
    /// Fails with `TopologyShape` unless the dimensions are non-empty,
    /// positive, match `periodic` in length and multiply to `size`.
    pub fn new(size: usize, dims: &[usize], periodic: &[bool], reorder: bool) -> Result<CartesianTopology> {
        if dims.is_empty() {
            return Err(Error::TopologyShape("no dimensions given".to_string()));
        }
        if dims.len() != periodic.len() {
            return Err(Error::TopologyShape(format!(
                "{} dimensions but {} periodicity flags",
                dims.len(),
                periodic.len()
            )));
        }
        if let Some(i) = dims.iter().position(|&d| d == 0) {
            return Err(Error::TopologyShape(format!("dimension {i} is empty")));
        }
        let product = dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| Error::TopologyShape("dimension product overflows".to_string()))?;
        if product != size {
            return Err(Error::TopologyShape(format!(
                "grid {dims:?} holds {product} processes, group has {size}"
            )));
        }
        Ok(CartesianTopology {
            dims: dims.to_vec(),
            periodic: periodic.to_vec(),
            reordered: reorder,
        })
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn periodic(&self) -> &[bool] {
        &self.periodic
    }

    /// Whether the runtime was allowed to reorder ranks.
    pub fn reordered(&self) -> bool {
        self.reordered
    }

    /// Number of dimensions.
    pub fn ndims(&self) -> usize {
        self.dims.len()
    }

    /// Number of grid points.
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    /// Coordinates of `rank` in the grid.
    pub fn coords_of(&self, rank: Rank) -> Result<Vec<usize>> {
        let mut rest = usize::try_from(rank)
            .ok()
            .filter(|&r| r < self.size())
            .ok_or(Error::InvalidRank(rank))?;
        let mut coords = vec![0; self.dims.len()];
        for (c, &d) in coords.iter_mut().zip(&self.dims).rev() {
            *c = rest % d;
            rest /= d;
        }
        Ok(coords)
    }

    /// Rank at `coords`, the inverse of `coords_of`.
    pub fn rank_of(&self, coords: &[usize]) -> Result<Rank> {
        if coords.len() != self.dims.len() {
            return Err(Error::TopologyShape(format!(
                "{} coordinates for a {}-dimensional grid",
                coords.len(),
                self.dims.len()
            )));
        }
        let mut rank = 0;
        for (i, (&c, &d)) in coords.iter().zip(&self.dims).enumerate() {
            if c >= d {
                return Err(Error::TopologyShape(format!(
                    "coordinate {c} out of range for dimension {i} of size {d}"
                )));
            }
            rank = rank * d + c;
        }
        Ok(rank as Rank)
    }

    /// Neighbours of `rank` at distance `disp` along `dim`.
    ///
    /// Returns the (source, destination) pair: the rank `disp` steps behind
    /// and the rank `disp` steps ahead. Off the edge of a non-periodic
    /// dimension the neighbour is `None`.
    pub fn shift(&self, rank: Rank, dim: usize, disp: isize) -> Result<(Option<Rank>, Option<Rank>)> {
        if dim >= self.dims.len() {
            return Err(Error::TopologyShape(format!(
                "dimension {dim} out of range for a {}-dimensional grid",
                self.dims.len()
            )));
        }
        let coords = self.coords_of(rank)?;
        let source = self.step(&coords, dim, -disp)?;
        let dest = self.step(&coords, dim, disp)?;
        Ok((source, dest))
    }

    fn step(&self, coords: &[usize], dim: usize, disp: isize) -> Result<Option<Rank>> {
        let d = self.dims[dim] as isize;
        let mut c = coords[dim] as isize + disp;
        if self.periodic[dim] {
            c = c.rem_euclid(d);
        } else if c < 0 || c >= d {
            return Ok(None);
        }
        let mut moved = coords.to_vec();
        moved[dim] = c as usize;
        self.rank_of(&moved).map(Some)
    }
}

/// Split `nnodes` processes into `ndims` dimensions as evenly as possible.
///
/// Dimensions are returned in non-increasing order.
pub fn dims_create(nnodes: usize, ndims: usize) -> Result<Vec<usize>> {
    if ndims == 0 {
        return Err(Error::TopologyShape("no dimensions requested".to_string()));
    }
    if nnodes == 0 {
        return Err(Error::TopologyShape("no processes to arrange".to_string()));
    }
    let mut factors = Vec::new();
    let mut n = nnodes;
    let mut p = 2;
    while p * p <= n {
        while n % p == 0 {
            factors.push(p);
            n /= p;
        }
        p += 1;
    }
    if n > 1 {
        factors.push(n);
    }
    let mut dims = vec![1; ndims];
    // Largest factors first, each onto the currently smallest dimension
    for f in factors.into_iter().rev() {
        if let Some(smallest) = dims.iter_mut().min() {
            *smallest *= f;
        }
    }
    dims.sort_unstable_by(|a, b| b.cmp(a));
    Ok(dims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_round_trip() {
        for dims in [vec![4], vec![2, 2], vec![3, 2], vec![2, 3, 4], vec![1, 5, 1]] {
            let size = dims.iter().product();
            let topo = CartesianTopology::new(size, &dims, &vec![false; dims.len()], false).unwrap();
            for rank in 0..size as Rank {
                let coords = topo.coords_of(rank).unwrap();
                assert_eq!(topo.rank_of(&coords).unwrap(), rank);
                assert!(coords.iter().zip(&dims).all(|(c, d)| c < d));
            }
        }
    }

    #[test]
    fn last_dimension_varies_fastest() {
        let topo = CartesianTopology::new(6, &[2, 3], &[false, false], false).unwrap();
        assert_eq!(topo.coords_of(0).unwrap(), vec![0, 0]);
        assert_eq!(topo.coords_of(1).unwrap(), vec![0, 1]);
        assert_eq!(topo.coords_of(3).unwrap(), vec![1, 0]);
        assert_eq!(topo.coords_of(5).unwrap(), vec![1, 2]);
    }

    #[test]
    fn bad_shapes_are_rejected() {
        assert!(matches!(
            CartesianTopology::new(4, &[3, 2], &[false, false], false),
            Err(Error::TopologyShape(_))
        ));
        assert!(matches!(
            CartesianTopology::new(4, &[], &[], false),
            Err(Error::TopologyShape(_))
        ));
        assert!(matches!(
            CartesianTopology::new(4, &[2, 2], &[false], false),
            Err(Error::TopologyShape(_))
        ));
        assert!(matches!(
            CartesianTopology::new(0, &[0], &[false], false),
            Err(Error::TopologyShape(_))
        ));
        let topo = CartesianTopology::new(4, &[2, 2], &[false, false], false).unwrap();
        assert!(matches!(topo.coords_of(4), Err(Error::InvalidRank(4))));
        assert!(topo.rank_of(&[2, 0]).is_err());
        assert!(topo.rank_of(&[0]).is_err());
    }

    #[test]
    fn shift_wraps_only_periodic_dimensions() {
        let topo = CartesianTopology::new(6, &[2, 3], &[false, true], false).unwrap();
        // rank 2 sits at (0, 2)
        assert_eq!(topo.shift(2, 1, 1).unwrap(), (Some(1), Some(0)));
        assert_eq!(topo.shift(2, 0, 1).unwrap(), (None, Some(5)));
        assert_eq!(topo.shift(5, 0, 1).unwrap(), (Some(2), None));
        assert_eq!(topo.shift(0, 1, -1).unwrap(), (Some(1), Some(2)));
        assert!(topo.shift(0, 2, 1).is_err());
    }

    #[test]
    fn dims_are_balanced() {
        assert_eq!(dims_create(4, 2).unwrap(), vec![2, 2]);
        assert_eq!(dims_create(6, 2).unwrap(), vec![3, 2]);
        assert_eq!(dims_create(12, 3).unwrap(), vec![3, 2, 2]);
        assert_eq!(dims_create(7, 2).unwrap(), vec![7, 1]);
        assert_eq!(dims_create(1, 3).unwrap(), vec![1, 1, 1]);
        assert!(dims_create(0, 2).is_err());
    }
}
