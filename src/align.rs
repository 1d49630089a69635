/// Rounds `value` up to the next multiple of 8.
///
/// Boundary tags, bucket heads and payloads are all 8-byte aligned regardless
/// of the machine word size, so the region layout is identical for every
/// process that maps it.
///
/// # Examples
///
/// ```rust
/// use shmarena::align;
///
/// assert_eq!(align!(13u64), 16);
/// assert_eq!(align!(16u64), 16);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + 7) & !7
  };
}

/// Rounds `value` down to the previous multiple of 8.
///
/// ```rust
/// use shmarena::align_down;
///
/// assert_eq!(align_down!(4095u64), 4088);
/// ```
#[macro_export]
macro_rules! align_down {
  ($value:expr) => {
    $value & !7
  };
}
