use vmi_core::{Asid, EventDebug, PendingEvent, Va, WatchpointFlags};
use zerocopy::FromBytes as _;

use crate::{
    Error,
    sys::{
        KVM_VMI_EVENT_DEBUG, KVM_VMI_EVENT_MTF, KVM_VMI_EVENT_SIZE, KVM_VMI_EVENT_TASK_SWITCH,
        KvmVmiEventDebug, KvmVmiEventTaskSwitch,
    },
};

/// Decodes a raw `union kvm_vmi_event` as written by the kernel.
///
/// Bytes past the size of the union are ignored.
pub fn decode_event(raw: &[u8]) -> Result<PendingEvent, Error> {
    let raw = raw.get(..KVM_VMI_EVENT_SIZE).ok_or(Error::Truncated {
        what: "kvm_vmi_event",
        expected: KVM_VMI_EVENT_SIZE,
        actual: raw.len(),
    })?;

    let (ty, _) = u32::read_from_prefix(raw).map_err(|_| Error::Truncated {
        what: "kvm_vmi_event",
        expected: KVM_VMI_EVENT_SIZE,
        actual: raw.len(),
    })?;

    match ty {
        KVM_VMI_EVENT_TASK_SWITCH => {
            let event = read::<KvmVmiEventTaskSwitch>(raw)?;
            Ok(PendingEvent::task_switch(
                Asid(event.old_cr3),
                Asid(event.new_cr3),
            ))
        }
        KVM_VMI_EVENT_DEBUG => {
            let event = read::<KvmVmiEventDebug>(raw)?;
            Ok(PendingEvent::Debug(EventDebug {
                single_step: event.single_step != 0,
                watchpoint: event.watchpoint != 0,
                watchpoint_va: Va(event.watchpoint_gva),
                watchpoint_flags: WatchpointFlags::from_bits_retain(event.watchpoint_flags),
                exception: event.exception,
            }))
        }
        KVM_VMI_EVENT_MTF => Ok(PendingEvent::SingleStepComplete),
        ty => Err(Error::UnknownEvent(ty)),
    }
}

fn read<T>(raw: &[u8]) -> Result<T, Error>
where
    T: zerocopy::FromBytes,
{
    T::read_from_bytes(raw).map_err(|_| Error::Truncated {
        what: std::any::type_name::<T>(),
        expected: size_of::<T>(),
        actual: raw.len(),
    })
}

#[cfg(test)]
mod tests {
    use vmi_core::BreakpointKind;
    use zerocopy::IntoBytes as _;

    use super::*;

    #[test]
    fn decodes_task_switch() {
        let raw = KvmVmiEventTaskSwitch {
            ty: KVM_VMI_EVENT_TASK_SWITCH,
            old_cr3: 0x2000,
            new_cr3: 0x1000,
            ..Default::default()
        };

        assert_eq!(
            decode_event(raw.as_bytes()).unwrap(),
            PendingEvent::task_switch(Asid(0x2000), Asid(0x1000))
        );
    }

    #[test]
    fn decodes_watchpoint() {
        let raw = KvmVmiEventDebug {
            ty: KVM_VMI_EVENT_DEBUG,
            watchpoint: 1,
            watchpoint_gva: 0xffff_8000_0000_1000,
            watchpoint_flags: 1,
            exception: 1,
            ..Default::default()
        };

        let event = match decode_event(raw.as_bytes()).unwrap() {
            PendingEvent::Debug(event) => event,
            event => panic!("unexpected event {event:?}"),
        };

        assert!(event.watchpoint);
        assert!(!event.single_step);
        assert_eq!(event.watchpoint_va, Va(0xffff_8000_0000_1000));
        assert_eq!(event.watchpoint_flags.kind(), BreakpointKind::WatchpointRead);
    }

    #[test]
    fn decodes_monitor_trap_flag() {
        let mut raw = [0u8; KVM_VMI_EVENT_SIZE + 8];
        raw[..4].copy_from_slice(&KVM_VMI_EVENT_MTF.to_ne_bytes());

        assert_eq!(
            decode_event(&raw).unwrap(),
            PendingEvent::SingleStepComplete
        );
    }

    #[test]
    fn rejects_unknown_type() {
        let mut raw = [0u8; KVM_VMI_EVENT_SIZE];
        raw[..4].copy_from_slice(&7u32.to_ne_bytes());

        assert!(matches!(decode_event(&raw), Err(Error::UnknownEvent(7))));
    }

    #[test]
    fn rejects_truncated_event() {
        assert!(matches!(
            decode_event(&[0u8; 8]),
            Err(Error::Truncated { actual: 8, .. })
        ));
    }
}
