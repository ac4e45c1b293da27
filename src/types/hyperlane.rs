//! Hyperlane contract bindings and message types.

use alloy::{
    primitives::{B256, Bytes},
    sol,
};

/// `moduleType()` value of a message-id multisig ISM, the only module the
/// relayer can assemble metadata for.
pub const ISM_TYPE_MESSAGE_ID_MULTISIG: u8 = 5;

sol! {
    #[sol(rpc)]
    interface IMailbox {
        /// Emitted when a message is dispatched for cross-chain delivery.
        event Dispatch(
            address indexed sender,
            uint32 indexed destination,
            bytes32 indexed recipient,
            bytes message
        );

        /// Emitted alongside [`Dispatch`] with the message's unique id.
        event DispatchId(bytes32 indexed messageId);

        function delivered(bytes32 messageId) external view returns (bool);

        function recipientIsm(address recipient) external view returns (address);

        function process(bytes calldata metadata, bytes calldata message) external;
    }

    #[sol(rpc)]
    interface IInterchainSecurityModule {
        function moduleType() external view returns (uint8);
    }

    #[sol(rpc)]
    interface IMultisigIsm {
        function validatorsAndThreshold(bytes calldata message)
            external
            view
            returns (address[] memory validators, uint8 threshold);
    }

    #[sol(rpc)]
    interface IValidatorAnnounce {
        function getAnnouncedStorageLocations(address[] calldata validators)
            external
            view
            returns (string[][] memory);
    }

    #[sol(rpc)]
    interface IMerkleTreeHook {
        /// Emitted when a dispatched message is inserted into the hook's tree.
        event InsertedIntoTree(bytes32 messageId, uint32 index);

        function count() external view returns (uint32);
    }
}

/// A `Dispatch` event decoded from a source-chain transaction, paired with
/// its message id.
#[derive(Debug, Clone)]
pub struct DispatchedMessage {
    /// Hyperlane domain the message is bound for.
    pub destination_domain: u32,
    /// Message recipient, left-padded to 32 bytes.
    pub recipient: B256,
    /// The raw hyperlane message.
    pub message: Bytes,
    /// keccak digest of the message, as announced by `DispatchId`.
    pub message_id: B256,
}

/// The merkle-tree hook's record of a dispatched message.
#[derive(Debug, Clone, Copy)]
pub struct MerkleHookInsertion {
    /// Message id inserted into the tree.
    pub message_id: B256,
    /// Leaf index of the insertion.
    pub index: u32,
}
