use crate::error::{OfdmFrameError, Result};
use std::fmt;

/// Role of a single subcarrier (FFT bin) in every OFDM symbol of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubcarrierType {
    Null,
    Pilot,
    Data,
}

/// Subcarrier allocation table, indexed by FFT bin.
///
/// Bin `k` carries signed frequency `k` for `k < M/2` and `k - M` otherwise,
/// so bin 0 is DC and bin `M/2` is the Nyquist edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubcarrierAllocation {
    roles: Vec<SubcarrierType>,
    num_null: usize,
    num_pilot: usize,
    num_data: usize,
}

/// Signed frequency index of FFT bin `bin` for an `m`-point transform.
#[inline]
pub fn signed_frequency(bin: usize, m: usize) -> isize {
    if bin < m / 2 {
        bin as isize
    } else {
        bin as isize - m as isize
    }
}

/// FFT bin holding signed frequency `freq`.
#[inline]
pub fn bin_of(freq: isize, m: usize) -> usize {
    freq.rem_euclid(m as isize) as usize
}

impl SubcarrierAllocation {
    /// Default allocation: nulls at DC and in a guard band around the Nyquist
    /// edge, one pilot every P subcarriers, the rest data.
    pub fn init_default(m: usize) -> Result<Self> {
        if m < 8 || m % 2 != 0 {
            return Err(OfdmFrameError::InvalidAllocation(format!(
                "default allocation needs an even number of subcarriers >= 8, got {}",
                m
            )));
        }

        let guard = (m / 10).max(2);
        let edge = (m / 2 - guard) as isize;
        let spacing: isize = if m > 34 { 8 } else { 4 };

        let roles = (0..m)
            .map(|bin| {
                let f = signed_frequency(bin, m);
                if f == 0 || f.abs() > edge {
                    SubcarrierType::Null
                } else if f.abs() % spacing == spacing / 2 {
                    SubcarrierType::Pilot
                } else {
                    SubcarrierType::Data
                }
            })
            .collect();

        Self::from_roles(roles)
    }

    /// Build a custom allocation; fails if it has no pilot or no data subcarrier.
    pub fn from_roles(roles: Vec<SubcarrierType>) -> Result<Self> {
        let (num_null, num_pilot, num_data) = Self::validate(&roles, roles.len())?;
        Ok(Self {
            roles,
            num_null,
            num_pilot,
            num_data,
        })
    }

    /// Check a role table against `m` subcarriers and return the
    /// `(null, pilot, data)` counts.
    pub fn validate(roles: &[SubcarrierType], m: usize) -> Result<(usize, usize, usize)> {
        if roles.len() != m {
            return Err(OfdmFrameError::InvalidAllocation(format!(
                "table has {} entries for {} subcarriers",
                roles.len(),
                m
            )));
        }

        let mut counts = (0, 0, 0);
        for role in roles {
            match role {
                SubcarrierType::Null => counts.0 += 1,
                SubcarrierType::Pilot => counts.1 += 1,
                SubcarrierType::Data => counts.2 += 1,
            }
        }

        if counts.1 == 0 {
            return Err(OfdmFrameError::InvalidAllocation(
                "at least one pilot subcarrier is required".to_string(),
            ));
        }
        if counts.2 == 0 {
            return Err(OfdmFrameError::InvalidAllocation(
                "at least one data subcarrier is required".to_string(),
            ));
        }
        Ok(counts)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn roles(&self) -> &[SubcarrierType] {
        &self.roles
    }

    #[inline]
    pub fn role(&self, bin: usize) -> SubcarrierType {
        self.roles[bin]
    }

    #[inline]
    pub fn is_enabled(&self, bin: usize) -> bool {
        self.roles[bin] != SubcarrierType::Null
    }

    pub fn num_null(&self) -> usize {
        self.num_null
    }

    pub fn num_pilot(&self) -> usize {
        self.num_pilot
    }

    pub fn num_data(&self) -> usize {
        self.num_data
    }

    /// Pilot plus data subcarriers.
    pub fn num_enabled(&self) -> usize {
        self.num_pilot + self.num_data
    }

    /// Data bins in ascending bin order (the order symbols are loaded in).
    pub fn data_bins(&self) -> impl Iterator<Item = usize> + '_ {
        self.bins_with(SubcarrierType::Data)
    }

    pub fn pilot_bins(&self) -> impl Iterator<Item = usize> + '_ {
        self.bins_with(SubcarrierType::Pilot)
    }

    /// All bins ordered by signed frequency, lowest first.
    pub fn bins_by_frequency(&self) -> impl Iterator<Item = usize> + '_ {
        let m = self.roles.len();
        let half = (m / 2) as isize;
        (-half..half).map(move |f| bin_of(f, m))
    }

    fn bins_with(&self, wanted: SubcarrierType) -> impl Iterator<Item = usize> + '_ {
        self.roles
            .iter()
            .enumerate()
            .filter(move |&(_, &role)| role == wanted)
            .map(|(bin, _)| bin)
    }
}

impl fmt::Display for SubcarrierAllocation {
    /// One character per subcarrier in frequency order: `.` null, `P` pilot, `+` data.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bin in self.bins_by_frequency() {
            let c = match self.roles[bin] {
                SubcarrierType::Null => '.',
                SubcarrierType::Pilot => 'P',
                SubcarrierType::Data => '+',
            };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}
