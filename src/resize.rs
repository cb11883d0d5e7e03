use derivative::Derivative;

/// Encode quality in percent, coerced into `[0, 100]`.
///
/// Anything outside the range means full quality rather than an error.
#[derive(Derivative, Clone, Copy, PartialEq, Eq)]
#[derivative(Debug = "transparent", Default)]
pub struct Quality(#[derivative(Default(value = "100"))] u8);

impl Quality {
  pub const FULL: Quality = Quality(100);

  pub fn new(percent: i32) -> Self {
    match u8::try_from(percent) {
      Ok(percent) if percent <= 100 => Quality(percent),
      _ => Quality::FULL,
    }
  }

  pub fn percent(self) -> u8 {
    self.0
  }

  /// Strength for a lossy encoder, only for `1..=99`.
  pub fn lossy(self) -> Option<u8> {
    (1..=99).contains(&self.0).then_some(self.0)
  }
}

/// Optional bounding box requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Constraints {
  pub max_width: Option<f64>,
  pub max_height: Option<f64>,
}

impl Constraints {
  pub fn new(max_width: Option<f64>, max_height: Option<f64>) -> Self {
    Self {
      max_width,
      max_height,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.max_width.is_none() && self.max_height.is_none()
  }
}

/// Output dimensions for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResizeTarget {
  pub width: u32,
  pub height: u32,
}

impl ResizeTarget {
  pub fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }
}

/// Whether a source has to be re-encoded at all.
///
/// No constraints at full quality is a pass-through.
pub fn should_scale(constraints: &Constraints, quality: Quality) -> bool {
  !constraints.is_empty() || quality != Quality::FULL
}

/// Computes the downscaled size of a `width` x `height` source.
///
/// Each axis starts clamped to its own constraint. When a constraint actually
/// shrinks an axis, the smaller candidate drives the scale and the other axis
/// is recomputed from it, except that an axis without a constraint is the one
/// recomputed. Equal candidates recompute the axis that was originally
/// smaller; a square source keeps the candidates as they are.
pub fn target_size(width: u32, height: u32, constraints: &Constraints) -> ResizeTarget {
  let original_width = width as f64;
  let original_height = height as f64;
  let has_max_width = constraints.max_width.is_some();
  let has_max_height = constraints.max_height.is_some();

  let mut width = constraints
    .max_width
    .map_or(original_width, |max| original_width.min(max));
  let mut height = constraints
    .max_height
    .map_or(original_height, |max| original_height.min(max));

  let downscale_width = constraints.max_width.is_some_and(|max| max < original_width);
  let downscale_height = constraints.max_height.is_some_and(|max| max < original_height);

  if downscale_width || downscale_height {
    let downscaled_width = (height / original_height) * original_width;
    let downscaled_height = (width / original_width) * original_height;

    if width < height {
      if !has_max_width {
        width = downscaled_width;
      } else {
        height = downscaled_height;
      }
    } else if height < width {
      if !has_max_height {
        height = downscaled_height;
      } else {
        width = downscaled_width;
      }
    } else if original_width < original_height {
      width = downscaled_width;
    } else if original_height < original_width {
      height = downscaled_height;
    }
  }

  ResizeTarget {
    width: (width as u32).max(1),
    height: (height as u32).max(1),
  }
}
