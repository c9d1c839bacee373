//! Dimension name generator.

/// Generates iteration dimension names `A`, `B`, ... `Z`, `AA`, `AB`, ...
///
/// Names passed to [`DimNameGen::excluding`] are skipped, so that generated
/// names can be mixed with a fixed set of names (eg. `M`, `N`, `K`) without
/// collisions.
pub struct DimNameGen {
    next_index: usize,
    reserved: Vec<String>,
}

impl Default for DimNameGen {
    fn default() -> Self {
        Self::new()
    }
}

impl DimNameGen {
    pub fn new() -> Self {
        Self::excluding(&[])
    }

    /// Create a generator which never yields any of `reserved`.
    pub fn excluding(reserved: &[&str]) -> Self {
        Self {
            next_index: 0,
            reserved: reserved.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Generate the next name.
    pub fn gen_name(&mut self) -> String {
        loop {
            let name = index_to_name(self.next_index);
            self.next_index += 1;
            if !self.reserved.contains(&name) {
                return name;
            }
        }
    }

    /// Generate `n` names.
    pub fn gen_names(&mut self, n: usize) -> Vec<String> {
        (0..n).map(|_| self.gen_name()).collect()
    }
}

/// Convert a zero-based index to a bijective base-26 name.
fn index_to_name(mut index: usize) -> String {
    let mut chars = Vec::new();
    loop {
        chars.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    chars.iter().rev().map(|&c| c as char).collect()
}
