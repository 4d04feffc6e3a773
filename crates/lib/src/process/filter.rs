//! Line filters for displayed tool output.

/// Decides which stdout lines of one invocation are displayed.
///
/// Filters are stateful: once an `exclude_after` marker has been seen every
/// later line is suppressed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputFilter {
  mode: FilterMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum FilterMode {
  #[default]
  PassAll,
  ExcludeAfter {
    marker: String,
    tripped: bool,
  },
  BlackHole,
}

impl OutputFilter {
  /// Show lines up to and including the first one containing `marker`.
  pub fn exclude_after(marker: impl Into<String>) -> Self {
    Self {
      mode: FilterMode::ExcludeAfter {
        marker: marker.into(),
        tripped: false,
      },
    }
  }

  /// Suppress every line.
  pub fn black_hole() -> Self {
    Self {
      mode: FilterMode::BlackHole,
    }
  }

  /// Returns whether `line` should be displayed.
  pub fn accept(&mut self, line: &str) -> bool {
    match &mut self.mode {
      FilterMode::PassAll => true,
      FilterMode::BlackHole => false,
      FilterMode::ExcludeAfter { marker, tripped } => {
        if *tripped {
          return false;
        }
        if line.contains(marker.as_str()) {
          *tripped = true;
        }
        true
      }
    }
  }
}
