use candle_core::{DType, Device, Result, Tensor};

/// Positions of the non-zero entries of a 0/1 mask, as a `u32` index tensor.
pub fn mask_to_index(mask: &Tensor) -> Result<Tensor> {
    let mask = mask.flatten_all()?.to_dtype(DType::U8)?;
    let index: Vec<u32> = mask
        .to_vec1::<u8>()?
        .into_iter()
        .enumerate()
        .filter_map(|(idx, m)| if m == 0 { None } else { Some(idx as u32) })
        .collect();
    let len = index.len();
    Tensor::from_vec(index, len, mask.device())
}

/// Inverse of [`mask_to_index`] for a graph with `len` nodes.
pub fn index_to_mask(index: &[u32], len: usize, device: &Device) -> Result<Tensor> {
    let mut mask = vec![0u8; len];
    for &idx in index {
        match mask.get_mut(idx as usize) {
            Some(m) => *m = 1,
            None => candle_core::bail!("index {idx} out of range for {len} nodes"),
        }
    }
    Tensor::from_vec(mask, len, device)
}

pub fn index_tensor(index: &[u32], device: &Device) -> Result<Tensor> {
    Tensor::from_slice(index, index.len(), device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_round_trip() -> Result<()> {
        let device = Device::Cpu;
        let mask = Tensor::new(&[0u8, 1, 1, 0, 1], &device)?;
        let index = mask_to_index(&mask)?;
        assert_eq!(index.to_vec1::<u32>()?, vec![1, 2, 4]);
        let back = index_to_mask(&index.to_vec1::<u32>()?, 5, &device)?;
        assert_eq!(back.to_vec1::<u8>()?, vec![0, 1, 1, 0, 1]);
        assert!(index_to_mask(&[5], 5, &device).is_err());
        Ok(())
    }

    #[test]
    fn empty_mask_gives_empty_index() -> Result<()> {
        let mask = Tensor::zeros(4, DType::U8, &Device::Cpu)?;
        assert_eq!(mask_to_index(&mask)?.dims(), &[0]);
        Ok(())
    }
}
