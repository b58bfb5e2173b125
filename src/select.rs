// Branchless choice between the training offset and the attack offset.
//
// The victim's bounds check must stay the only conditional branch in the
// training loop. Both helpers below depend on their inputs only through
// arithmetic.

use std::hint::black_box;

/// One attack call for every `ATTACK_PERIOD` calls, the rest train.
pub const ATTACK_PERIOD: usize = 6;

/// All ones when call index `i` is an attack call (`i % ATTACK_PERIOD == 0`),
/// zero otherwise.
#[inline(always)]
pub fn attack_mask(i: usize) -> usize
{
    // (i % 6) - 1 wraps to all ones only for a remainder of zero, otherwise
    // it is 0..=4 and the high bits clear it
    let mut mask = (i % ATTACK_PERIOD).wrapping_sub(1) & !0xFFFF;
    mask |= mask >> 16;
    mask
}

/// `attack` where `mask` is all ones, `training` where it is zero.
#[inline(always)]
pub fn select(mask: usize, attack: usize, training: usize) -> usize
{
    training ^ (black_box(mask) & (attack ^ training))
}

/// The offset handed to the victim on call `i`.
#[inline(always)]
pub fn offset_for_call(i: usize, attack: usize, training: usize) -> usize
{
    select(attack_mask(i), attack, training)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn mask_is_all_or_nothing()
    {
        for i in 0..1000 {
            let m = attack_mask(i);
            if i % ATTACK_PERIOD == 0 {
                assert_eq!(m, usize::MAX, "call {}", i);
            } else {
                assert_eq!(m, 0, "call {}", i);
            }
        }
    }

    #[test]
    fn select_picks_by_mask()
    {
        assert_eq!(select(usize::MAX, 224, 3), 224);
        assert_eq!(select(0, 224, 3), 3);
        assert_eq!(select(usize::MAX, usize::MAX - 1, 0), usize::MAX - 1);
    }

    #[test]
    fn thirty_calls_hold_five_training_calls_per_attack()
    {
        let attacks = (0..30).filter(|&i| offset_for_call(i, 500, 7) == 500).count();
        let training = (0..30).filter(|&i| offset_for_call(i, 500, 7) == 7).count();
        assert_eq!(attacks, 5);
        assert_eq!(training, 25);
    }
}
